//! Shared plumbing for behaviour tests: in-memory transports, a severable
//! link for resumption scenarios, and a fixed acceptor.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use loomwire::{
    Accepted,
    Acceptor,
    ClientConfig,
    Connection,
    DuplexSocket,
    Responder,
    ResponderError,
    ServerConfig,
    SessionManager,
    SetupInfo,
    handshake,
};
use tokio::{
    io::{DuplexStream, duplex},
    sync::oneshot,
};

/// Generous in-memory pipe so writers never block on a slow test.
pub const PIPE_CAPACITY: usize = 1 << 20;

/// Acceptor handing every connection the same responder.
pub struct StaticAcceptor(pub Arc<dyn Responder>);

#[async_trait]
impl Acceptor for StaticAcceptor {
    async fn accept(
        &self,
        _setup: SetupInfo,
        _socket: DuplexSocket,
    ) -> Result<Arc<dyn Responder>, ResponderError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Responder with every handler left at its declining default.
pub struct Inert;

#[async_trait]
impl Responder for Inert {}

/// Establish a client/server pair over an in-memory duplex.
pub async fn establish(
    client_config: ClientConfig,
    server_config: ServerConfig,
    server_responder: Arc<dyn Responder>,
) -> (Connection, Connection, Arc<SessionManager>) {
    let (client_io, server_io) = duplex(PIPE_CAPACITY);
    let sessions = Arc::new(SessionManager::new());
    let acceptor: Arc<dyn Acceptor> = Arc::new(StaticAcceptor(server_responder));

    let accept_sessions = Arc::clone(&sessions);
    let server = tokio::spawn(async move {
        handshake::accept(server_io, &server_config, &acceptor, &accept_sessions).await
    });
    let client = handshake::connect(client_io, client_config, Arc::new(Inert))
        .await
        .expect("client connect");
    let accepted = server
        .await
        .expect("accept task")
        .expect("server handshake");
    let Accepted::Established(server) = accepted else {
        panic!("expected an established connection");
    };
    (client, server, sessions)
}

/// A client/server byte link that can be severed on demand, so both ends
/// observe a transport loss.
pub fn severable_link() -> (DuplexStream, DuplexStream, oneshot::Sender<()>) {
    let (client_near, mut client_far) = duplex(PIPE_CAPACITY);
    let (server_near, mut server_far) = duplex(PIPE_CAPACITY);
    let (sever_tx, sever_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            _ = sever_rx => {}
            _ = tokio::io::copy_bidirectional(&mut client_far, &mut server_far) => {}
        }
    });
    (client_near, server_near, sever_tx)
}
