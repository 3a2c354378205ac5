//! Producer tasks driving user publishers under credit.
//!
//! One task runs per producing stream. It waits on the stream's credit
//! gate before pulling each item from the user's sequence, so a paused
//! publisher is never polled, and it always ends by acknowledging its
//! stop so the multiplexer can reclaim the stream record.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    event::Intent,
    responder::{Responder, ResponderResult},
};
use crate::{
    backpressure::{CreditGate, GateState},
    frame::StreamId,
    payload::Payload,
};

/// Drive a payload sequence for one producing stream.
pub(crate) async fn run_producer(
    stream_id: StreamId,
    mut source: BoxStream<'static, ResponderResult>,
    gate: CreditGate,
    cancel: CancellationToken,
    intents: mpsc::Sender<Intent>,
) {
    loop {
        let state = tokio::select! { biased;
            () = cancel.cancelled() => GateState::Revoked,
            state = gate.ready() => state,
        };
        if state == GateState::Revoked {
            break;
        }

        let item = tokio::select! { biased;
            () = cancel.cancelled() => break,
            item = source.next() => item,
        };
        match item {
            Some(Ok(payload)) => {
                if intents
                    .send(Intent::ProducerNext { stream_id, payload })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(Err(error)) => {
                let _ = intents
                    .send(Intent::ProducerError {
                        stream_id,
                        message: error.message,
                    })
                    .await;
                break;
            }
            None => {
                let _ = intents.send(Intent::ProducerComplete { stream_id }).await;
                break;
            }
        }
    }
    let _ = intents.send(Intent::ProducerStopped { stream_id }).await;
}

/// Serve one request/response interaction; implicit credit of one.
pub(crate) async fn run_response_handler(
    stream_id: StreamId,
    responder: Arc<dyn Responder>,
    payload: Payload,
    cancel: CancellationToken,
    intents: mpsc::Sender<Intent>,
) {
    let result = tokio::select! { biased;
        () = cancel.cancelled() => None,
        result = responder.request_response(payload) => Some(result),
    };
    if let Some(result) = result {
        let _ = intents
            .send(Intent::ProducerRespond { stream_id, result })
            .await;
    }
    let _ = intents.send(Intent::ProducerStopped { stream_id }).await;
}
