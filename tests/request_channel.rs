//! Bidirectional channel behaviour.

mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use common::establish;
use futures::{StreamExt, stream};
use loomwire::{
    ClientConfig,
    Payload,
    PayloadStream,
    Responder,
    ResponderError,
    ResponderResult,
    ServerConfig,
};
use tokio::time::timeout;

/// Echoes every inbound channel payload with an `echo:` prefix.
struct ChannelEcho;

#[async_trait]
impl Responder for ChannelEcho {
    fn request_channel(
        &self,
        payloads: PayloadStream,
    ) -> futures::stream::BoxStream<'static, ResponderResult> {
        stream::once(async move {
            // Grant the requester demand for its outbound payloads, then
            // echo whatever arrives.
            payloads.request(64).await;
            payloads.map(|item| match item {
                Ok(payload) => {
                    let mut echoed = b"echo:".to_vec();
                    echoed.extend_from_slice(payload.data());
                    Ok(Payload::from_data(Bytes::from(echoed)))
                }
                Err(error) => Err(ResponderError::new(error.to_string())),
            })
        })
        .flatten()
        .boxed()
    }
}

#[tokio::test]
async fn channel_echoes_every_payload_in_order() {
    let (client, _server, _sessions) = establish(
        ClientConfig::default(),
        ServerConfig::default(),
        Arc::new(ChannelEcho),
    )
    .await;

    let outbound = stream::iter(["two", "three"].map(Payload::from));
    let items = client
        .socket()
        .request_channel(Payload::from("one"), outbound, 16)
        .await
        .expect("open channel");

    let echoed: Vec<Vec<u8>> = timeout(
        Duration::from_secs(5),
        items
            .map(|item| item.expect("ok").data().to_vec())
            .collect::<Vec<_>>(),
    )
    .await
    .expect("channel drains");

    assert_eq!(
        echoed,
        vec![
            b"echo:one".to_vec(),
            b"echo:two".to_vec(),
            b"echo:three".to_vec(),
        ]
    );
}
