//! Per-transport reader task.
//!
//! Reads length-prefixed buffers, decodes them into typed frames, counts
//! resumable bytes, and forwards everything to the multiplexer in arrival
//! order. Interruptions report a transport loss (the session may be
//! resumable); structural violations report a connection-fatal error. The
//! task dies with its transport; re-attachment spawns a fresh reader.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ReaderFrames, event::Intent};
use crate::{error::ConnectionError, frame::codec, resume::ResumeCounters};

pub(crate) async fn run_reader(
    mut frames: ReaderFrames,
    intents: mpsc::Sender<Intent>,
    counters: Arc<ResumeCounters>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! { biased;
            () = shutdown.cancelled() => return,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(buffer)) => {
                let wire_len = buffer.len() as u64;
                match codec::decode(buffer) {
                    Ok(frame) => {
                        if frame.is_resumable() {
                            counters.add_read(wire_len);
                        }
                        if intents.send(Intent::Inbound { frame }).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = intents
                            .send(Intent::ProtocolViolation {
                                error: ConnectionError::Protocol(error),
                            })
                            .await;
                        return;
                    }
                }
            }
            Some(Err(error)) if error.is_interruption() => {
                debug!("transport interrupted: {error}");
                let _ = intents.send(Intent::TransportLost).await;
                return;
            }
            Some(Err(error)) => {
                warn!("inbound framing violation: {error}");
                let _ = intents
                    .send(Intent::ProtocolViolation {
                        error: error.into(),
                    })
                    .await;
                return;
            }
            None => {
                let _ = intents.send(Intent::TransportLost).await;
                return;
            }
        }
    }
}
