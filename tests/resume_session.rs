//! Session resumption across transport loss.

mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use common::{Inert, PIPE_CAPACITY, StaticAcceptor, severable_link};
use loomwire::{
    Accepted,
    Acceptor,
    ClientConfig,
    Connection,
    HandshakeError,
    Payload,
    Responder,
    ResponderResult,
    ServerConfig,
    SessionManager,
    handshake,
    session::run_sweeper,
};
use tokio::{
    io::duplex,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

struct Mirror;

#[async_trait]
impl Responder for Mirror {
    async fn request_response(&self, payload: Payload) -> ResponderResult { Ok(payload) }
}

struct Harness {
    client: Connection,
    server: Connection,
    sessions: Arc<SessionManager>,
    server_config: ServerConfig,
    acceptor: Arc<dyn Acceptor>,
    sweeper_shutdown: CancellationToken,
}

/// Establish a resumable pair over a severable link, with the sweeper
/// running.
async fn resumable_pair() -> (Harness, tokio::sync::oneshot::Sender<()>) {
    let (client_io, server_io, sever) = severable_link();
    let sessions = Arc::new(SessionManager::new());
    let server_config = ServerConfig::default().with_resume();
    let acceptor: Arc<dyn Acceptor> = Arc::new(StaticAcceptor(Arc::new(Mirror)));
    let sweeper_shutdown = CancellationToken::new();
    tokio::spawn(run_sweeper(
        Arc::clone(&sessions),
        Duration::from_millis(500),
        sweeper_shutdown.clone(),
    ));

    let accept_config = server_config.clone();
    let accept_acceptor = Arc::clone(&acceptor);
    let accept_sessions = Arc::clone(&sessions);
    let accept_task = tokio::spawn(async move {
        handshake::accept(server_io, &accept_config, &accept_acceptor, &accept_sessions).await
    });

    let client_config = ClientConfig::default()
        .with_resume_token(Bytes::from_static(b"session-token-1"));
    let client = handshake::connect(client_io, client_config, Arc::new(Inert))
        .await
        .expect("connect");
    let Accepted::Established(server) = accept_task
        .await
        .expect("accept task")
        .expect("server handshake")
    else {
        panic!("expected establishment");
    };

    (
        Harness {
            client,
            server,
            sessions,
            server_config,
            acceptor,
            sweeper_shutdown,
        },
        sever,
    )
}

async fn exchange(client: &Connection, marker: u8) {
    let payload = Payload::from_data(Bytes::from(vec![marker; 256]));
    let response = timeout(
        Duration::from_secs(10),
        client.socket().request_response(payload.clone()),
    )
    .await
    .expect("response in time")
    .expect("response");
    assert_eq!(response, payload);
}

async fn wait_for_suspension(harness: &Harness) {
    let mut detached = harness.client.detached_watch();
    timeout(Duration::from_secs(30), async {
        while !*detached.borrow() {
            detached.changed().await.expect("watch alive");
        }
    })
    .await
    .expect("client notices the loss");

    timeout(Duration::from_secs(30), async {
        while harness.sessions.is_empty() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("server stores the session");
}

#[tokio::test(start_paused = true)]
async fn session_resumes_within_the_window_and_counters_agree() {
    let (harness, sever) = resumable_pair().await;

    exchange(&harness.client, 1).await;
    exchange(&harness.client, 2).await;

    let _ = sever.send(());
    wait_for_suspension(&harness).await;

    // Quiesced: each side has read exactly what the other wrote.
    let (client_written, client_read) = harness.client.positions();
    let (server_written, server_read) = harness.server.positions();
    assert_eq!(client_read, server_written);
    assert_eq!(server_read, client_written);
    assert!(client_written > 0);

    // Reconnect within the 30 s window.
    sleep(Duration::from_secs(5)).await;
    let (new_client_io, new_server_io) = duplex(PIPE_CAPACITY);
    let accept_config = harness.server_config.clone();
    let accept_acceptor = Arc::clone(&harness.acceptor);
    let accept_sessions = Arc::clone(&harness.sessions);
    let accept_task = tokio::spawn(async move {
        handshake::accept(new_server_io, &accept_config, &accept_acceptor, &accept_sessions).await
    });
    handshake::resume(&harness.client, new_client_io)
        .await
        .expect("resume accepted");
    let resumed = accept_task
        .await
        .expect("accept task")
        .expect("server resume");
    assert!(matches!(resumed, Accepted::Resumed));

    // The logical session continues on the new transport.
    exchange(&harness.client, 3).await;
    assert!(!harness.client.is_closed());
    assert!(!harness.server.is_closed());

    harness.sweeper_shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn resume_after_the_window_is_rejected() {
    let (harness, sever) = resumable_pair().await;
    exchange(&harness.client, 1).await;

    let _ = sever.send(());
    wait_for_suspension(&harness).await;

    // Past the 30 s session duration the sweep closes the session.
    sleep(Duration::from_secs(31)).await;
    assert!(harness.sessions.is_empty());

    let (new_client_io, new_server_io) = duplex(PIPE_CAPACITY);
    let accept_config = harness.server_config.clone();
    let accept_acceptor = Arc::clone(&harness.acceptor);
    let accept_sessions = Arc::clone(&harness.sessions);
    let accept_task = tokio::spawn(async move {
        handshake::accept(new_server_io, &accept_config, &accept_acceptor, &accept_sessions).await
    });
    let client_result = handshake::resume(&harness.client, new_client_io).await;
    match client_result {
        Err(HandshakeError::ResumeRejected { message }) => {
            assert_eq!(message, "no such session");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let server_result = accept_task.await.expect("accept task");
    assert!(matches!(
        server_result,
        Err(HandshakeError::ResumeRejected { .. })
    ));

    harness.sweeper_shutdown.cancel();
}
