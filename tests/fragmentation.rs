//! End-to-end fragmentation: oversized payloads split at the MTU and
//! arrive byte-for-byte intact.

mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use common::establish;
use loomwire::{ClientConfig, Payload, Responder, ResponderResult, ServerConfig};
use tokio::time::timeout;

/// Echoes the request payload back unchanged.
struct Mirror;

#[async_trait]
impl Responder for Mirror {
    async fn request_response(&self, payload: Payload) -> ResponderResult { Ok(payload) }
}

#[tokio::test]
async fn oversized_request_and_response_survive_a_small_mtu() {
    let client_config = ClientConfig::default()
        .with_fragment_mtu(256)
        .expect("valid mtu");
    let server_config = ServerConfig::default()
        .with_fragment_mtu(256)
        .expect("valid mtu");
    let (client, _server, _sessions) =
        establish(client_config, server_config, Arc::new(Mirror)).await;

    let data = Bytes::from((0..1000u16).map(|n| (n % 251) as u8).collect::<Vec<u8>>());
    let metadata = Bytes::from(vec![0x5A; 100]);
    let request = Payload::new(data.clone(), Some(metadata.clone()));

    let response = timeout(
        Duration::from_secs(5),
        client.socket().request_response(request),
    )
    .await
    .expect("response in time")
    .expect("response");

    assert_eq!(response.data(), &data);
    assert_eq!(response.metadata(), Some(&metadata));
}

#[tokio::test]
async fn fragmentation_is_transparent_at_the_default_mtu() {
    let (client, _server, _sessions) = establish(
        ClientConfig::default(),
        ServerConfig::default(),
        Arc::new(Mirror),
    )
    .await;

    let data = Bytes::from(vec![7u8; 100_000]);
    let response = timeout(
        Duration::from_secs(5),
        client
            .socket()
            .request_response(Payload::from_data(data.clone())),
    )
    .await
    .expect("response in time")
    .expect("response");
    assert_eq!(response.data(), &data);
}
