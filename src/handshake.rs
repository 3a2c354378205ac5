//! The connection machine: SETUP and RESUME exchanges.
//!
//! [`connect`] boots a client: it writes SETUP and starts the multiplexer
//! immediately, treating any later traffic as implicit acceptance.
//! [`accept`] boots the server side of one transport: it reads exactly
//! one frame and dispatches on it, rejecting anything that is not SETUP
//! or RESUME. [`resume`] re-attaches a client connection to a fresh
//! transport after loss.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{sync::watch, time::Instant};

use crate::{
    config::{ClientConfig, ServerConfig},
    connection::{
        Connection,
        ConnectionOptions,
        DuplexSocket,
        PendingResponder,
        Responder,
        ResponderError,
        Role,
        SuspendedSocket,
        WireFramed,
        frame_transport,
    },
    frame::{ErrorCode, Frame, FrameBody, FrameError, FrameType, StreamId, Version, codec},
    framing::{FramingError, MAX_WIRE_FRAME_LEN},
    payload::Payload,
    resume::ResumeToken,
    session::{SessionError, SessionManager},
    transport::Transport,
};

/// Errors raised while establishing or resuming a connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer rejected the SETUP exchange.
    #[error("setup rejected ({code}): {message}")]
    SetupRejected {
        /// Error code sent or received.
        code: ErrorCode,
        /// Diagnostic text.
        message: String,
    },
    /// The resume exchange was declined.
    #[error("resume rejected: {message}")]
    ResumeRejected {
        /// Diagnostic text.
        message: String,
    },
    /// The transport closed before the handshake finished.
    #[error("peer closed during handshake")]
    PeerClosed,
    /// The first frame was neither SETUP nor RESUME, or a reply had the
    /// wrong type.
    #[error("unexpected handshake frame {frame_type:?}")]
    UnexpectedFrame {
        /// Type of the offending frame.
        frame_type: FrameType,
    },
    /// A frame failed to decode during the handshake.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The length-prefixed layer failed during the handshake.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// The session store refused the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Decoded SETUP contents handed to the server acceptor.
#[derive(Clone, Debug)]
pub struct SetupInfo {
    /// Protocol version the client speaks.
    pub version: Version,
    /// Negotiated keepalive probe interval.
    pub keepalive_interval: Duration,
    /// Negotiated keepalive lifetime.
    pub max_lifetime: Duration,
    /// Whether the client requires lease-based admission.
    pub lease: bool,
    /// Resume token, when the client may reconnect.
    pub resume_token: Option<ResumeToken>,
    /// MIME type describing metadata sections.
    pub metadata_mime: String,
    /// MIME type describing data sections.
    pub data_mime: String,
    /// Opaque setup payload.
    pub payload: Payload,
}

/// Accepts or rejects incoming connections.
///
/// The returned responder serves the connection's inbound requests; an
/// error rejects the SETUP with the error's message bytes.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// Decide on one SETUP, with a sending socket already usable.
    async fn accept(
        &self,
        setup: SetupInfo,
        socket: DuplexSocket,
    ) -> Result<Arc<dyn Responder>, ResponderError>;
}

/// Outcome of [`accept`].
pub enum Accepted {
    /// A new connection was established from SETUP.
    Established(Connection),
    /// An existing suspended session was re-attached from RESUME.
    Resumed,
}

/// Establish a client connection over `transport`.
///
/// SETUP is written and the multiplexer starts immediately; acceptance
/// is implicit, so a server rejection surfaces later as a
/// connection-level error on the streams.
///
/// # Errors
///
/// Returns [`HandshakeError::Framing`] when the transport fails while
/// writing SETUP.
pub async fn connect(
    transport: impl Transport,
    config: ClientConfig,
    responder: Arc<dyn Responder>,
) -> Result<Connection, HandshakeError> {
    let mut framed = frame_transport(Box::new(transport), MAX_WIRE_FRAME_LEN);
    let setup = Frame::new(
        StreamId::ZERO,
        FrameBody::Setup {
            version: Version::CURRENT,
            keepalive_interval_ms: millis_u32(config.keepalive_interval),
            max_lifetime_ms: millis_u32(config.keepalive_max_lifetime),
            resume_token: config.resume_token.clone(),
            lease: config.lease,
            metadata_mime: config.metadata_mime.clone(),
            data_mime: config.data_mime.clone(),
            payload: config.setup_payload.clone(),
        },
    );
    send_frame(&mut framed, &setup).await?;

    let connection = Connection::spawn(ConnectionOptions {
        role: Role::Client,
        responder,
        fragment_mtu: config.fragment_mtu,
        reassembly_limit: config.reassembly_limit,
        keepalive_interval: config.keepalive_interval,
        keepalive_max_lifetime: config.keepalive_max_lifetime,
        resume_token: config.resume_token,
        lease_admission: false,
        lease_allowance: config.lease,
        lease_provider: None,
    });
    connection.attach(framed).await;
    info!("client connection established");
    Ok(connection)
}

/// Re-attach a suspended client connection to a fresh transport.
///
/// Sends RESUME with the connection's token and positions and awaits
/// RESUME_OK before wiring the transport in.
///
/// # Errors
///
/// Returns [`HandshakeError::ResumeRejected`] when the server declines,
/// [`HandshakeError::PeerClosed`] or [`HandshakeError::Framing`] on
/// transport failure, and [`HandshakeError::UnexpectedFrame`] when the
/// reply is neither RESUME_OK nor ERROR.
pub async fn resume(
    connection: &Connection,
    transport: impl Transport,
) -> Result<(), HandshakeError> {
    let Some(token) = connection.resume_token().cloned() else {
        return Err(HandshakeError::ResumeRejected {
            message: "connection has no resume token".to_owned(),
        });
    };
    let mut framed = frame_transport(Box::new(transport), MAX_WIRE_FRAME_LEN);
    let counters = Arc::clone(connection.counters());
    let frame = Frame::new(
        StreamId::ZERO,
        FrameBody::Resume {
            version: Version::CURRENT,
            token,
            last_received_server_position: counters.read(),
            first_available_client_position: 0,
        },
    );
    send_frame(&mut framed, &frame).await?;

    match read_frame(&mut framed).await? {
        Frame {
            body:
                FrameBody::ResumeOk {
                    last_received_client_position,
                },
            ..
        } => {
            let written = counters.written();
            if last_received_client_position < written {
                debug!(
                    "peer is {} resumable bytes behind; gap replay not buffered",
                    written - last_received_client_position
                );
            }
            connection.attach(framed).await;
            info!("client session resumed");
            Ok(())
        }
        Frame {
            body: FrameBody::Error { data, .. },
            ..
        } => Err(HandshakeError::ResumeRejected {
            message: String::from_utf8_lossy(&data).into_owned(),
        }),
        other => Err(HandshakeError::UnexpectedFrame {
            frame_type: other.frame_type(),
        }),
    }
}

/// Accept the server side of one freshly connected transport.
///
/// Reads the first frame and dispatches: SETUP establishes a connection
/// through `acceptor`, RESUME re-attaches a suspended session from
/// `sessions`, anything else is answered with a connection error and
/// closed.
///
/// # Errors
///
/// Returns [`HandshakeError::SetupRejected`] when validation or the
/// acceptor declines, [`HandshakeError::ResumeRejected`] when no usable
/// session exists, [`HandshakeError::UnexpectedFrame`] for an invalid
/// first frame, and transport-level variants on I/O failure. In every
/// rejection case the peer has already been sent the matching ERROR
/// frame.
pub async fn accept(
    transport: impl Transport,
    config: &ServerConfig,
    acceptor: &Arc<dyn Acceptor>,
    sessions: &Arc<SessionManager>,
) -> Result<Accepted, HandshakeError> {
    let mut framed = frame_transport(Box::new(transport), MAX_WIRE_FRAME_LEN);
    let first = read_frame(&mut framed).await?;
    match first.body {
        FrameBody::Setup {
            version,
            keepalive_interval_ms,
            max_lifetime_ms,
            resume_token,
            lease,
            metadata_mime,
            data_mime,
            payload,
        } => {
            let setup = SetupInfo {
                version,
                keepalive_interval: Duration::from_millis(u64::from(keepalive_interval_ms)),
                max_lifetime: Duration::from_millis(u64::from(max_lifetime_ms)),
                lease,
                resume_token,
                metadata_mime,
                data_mime,
                payload,
            };
            do_setup(framed, setup, config, acceptor, sessions).await
        }
        FrameBody::Resume {
            token,
            last_received_server_position,
            ..
        } => do_resume(framed, &token, last_received_server_position, config, sessions).await,
        _ => {
            let notice = Frame::connection_error(
                ErrorCode::ConnectionError,
                "first frame must be setup or resume",
            );
            let _ = send_frame(&mut framed, &notice).await;
            warn!("rejected connection: first frame was {:?}", first.frame_type());
            Err(HandshakeError::UnexpectedFrame {
                frame_type: first.frame_type(),
            })
        }
    }
}

async fn do_setup(
    mut framed: WireFramed,
    setup: SetupInfo,
    config: &ServerConfig,
    acceptor: &Arc<dyn Acceptor>,
    sessions: &Arc<SessionManager>,
) -> Result<Accepted, HandshakeError> {
    if setup.version.major != Version::CURRENT.major {
        return reject_setup(&mut framed, ErrorCode::InvalidSetup, "unsupported protocol version")
            .await;
    }
    if setup.keepalive_interval.is_zero() || setup.max_lifetime <= setup.keepalive_interval {
        return reject_setup(&mut framed, ErrorCode::InvalidSetup, "invalid keepalive parameters")
            .await;
    }
    if setup.lease && config.lease_provider.is_none() {
        return reject_setup(&mut framed, ErrorCode::UnsupportedSetup, "lease not supported")
            .await;
    }
    if setup.resume_token.is_some() && !config.resume_enable {
        return reject_setup(&mut framed, ErrorCode::UnsupportedSetup, "resume not supported")
            .await;
    }
    if let Some(token) = &setup.resume_token {
        if sessions.contains(token) {
            return reject_setup(
                &mut framed,
                ErrorCode::RejectedSetup,
                "duplicated setup token",
            )
            .await;
        }
    }

    let connection = Connection::spawn(ConnectionOptions {
        role: Role::Server,
        responder: Arc::new(PendingResponder),
        fragment_mtu: config.fragment_mtu,
        reassembly_limit: config.reassembly_limit,
        keepalive_interval: setup.keepalive_interval,
        keepalive_max_lifetime: setup.max_lifetime,
        resume_token: setup.resume_token.clone(),
        lease_admission: setup.lease,
        lease_allowance: false,
        lease_provider: setup.lease.then(|| config.lease_provider.clone()).flatten(),
    });

    let token = setup.resume_token.clone();
    match acceptor.accept(setup, connection.socket()).await {
        Ok(responder) => connection.set_responder(responder).await,
        Err(rejection) => {
            connection.suspended_handle().close();
            return reject_setup(&mut framed, ErrorCode::RejectedSetup, &rejection.message).await;
        }
    }

    if let Some(token) = token {
        tokio::spawn(run_suspension_monitor(
            Arc::clone(sessions),
            connection.suspended_handle(),
            connection.detached_watch(),
            token,
            config.resume_session_duration,
        ));
    }

    connection.attach(framed).await;
    info!("server connection established");
    Ok(Accepted::Established(connection))
}

async fn do_resume(
    mut framed: WireFramed,
    token: &[u8],
    last_received_server_position: u64,
    config: &ServerConfig,
    sessions: &Arc<SessionManager>,
) -> Result<Accepted, HandshakeError> {
    if !config.resume_enable {
        return reject_resume(&mut framed, "resume not supported").await;
    }
    let Ok(suspended) = sessions.take(token) else {
        return reject_resume(&mut framed, "no such session").await;
    };
    if suspended.is_closed() {
        return reject_resume(&mut framed, "no such session").await;
    }
    if last_received_server_position > suspended.written_position() {
        suspended.close();
        return reject_resume(&mut framed, "position mismatch").await;
    }

    let ok = Frame::resume_ok(suspended.read_position());
    send_frame(&mut framed, &ok).await?;
    suspended.reattach(framed).await;
    info!("server session resumed");
    Ok(Accepted::Resumed)
}

/// Re-store the session each time its transport drops.
async fn run_suspension_monitor(
    sessions: Arc<SessionManager>,
    suspended: SuspendedSocket,
    mut detached: watch::Receiver<bool>,
    token: ResumeToken,
    session_duration: Duration,
) {
    loop {
        if detached.changed().await.is_err() {
            return;
        }
        if !*detached.borrow() {
            continue;
        }
        if suspended.is_closed() {
            return;
        }
        let deadline = Instant::now() + session_duration;
        match sessions.store(token.clone(), suspended.clone(), deadline) {
            Ok(()) => debug!("session suspended awaiting resume"),
            Err(error) => {
                warn!("failed to store suspended session: {error}");
                suspended.close();
                return;
            }
        }
    }
}

async fn reject_setup(
    framed: &mut WireFramed,
    code: ErrorCode,
    message: &str,
) -> Result<Accepted, HandshakeError> {
    let notice = Frame::connection_error(code, message.as_bytes().to_vec());
    let _ = send_frame(framed, &notice).await;
    warn!("rejected setup: {message}");
    Err(HandshakeError::SetupRejected {
        code,
        message: message.to_owned(),
    })
}

async fn reject_resume(
    framed: &mut WireFramed,
    message: &str,
) -> Result<Accepted, HandshakeError> {
    let notice = Frame::connection_error(ErrorCode::RejectedResume, message.as_bytes().to_vec());
    let _ = send_frame(framed, &notice).await;
    warn!("rejected resume: {message}");
    Err(HandshakeError::ResumeRejected {
        message: message.to_owned(),
    })
}

async fn send_frame(framed: &mut WireFramed, frame: &Frame) -> Result<(), HandshakeError> {
    let buffer = codec::encode(frame)?;
    framed.send(buffer).await?;
    Ok(())
}

async fn read_frame(framed: &mut WireFramed) -> Result<Frame, HandshakeError> {
    match framed.next().await {
        Some(Ok(buffer)) => Ok(codec::decode(buffer)?),
        Some(Err(error)) => Err(error.into()),
        None => Err(HandshakeError::PeerClosed),
    }
}

fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
