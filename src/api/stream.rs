//! WebSocket call stream
//!
//! The duplex channel between the relay and the telephony edge. One
//! socket can carry any number of call sessions; frames are JSON tagged
//! by `event`. Malformed frames are logged and ignored, frames for
//! unknown sessions are dropped silently, and a closing socket tears
//! down every session it started.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ApiState;
use crate::Error;
use crate::events::EndReason;
use crate::orchestrator::metrics::MetricsSnapshot;
use crate::session::OutboundMessage;

/// Incoming frames from the telephony edge
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamIncoming {
    /// Open a call session on this socket
    Start {
        /// Session id; the relay mints one when absent
        #[serde(default)]
        session_id: Option<String>,
        /// BCP 47 language tag
        #[serde(default = "default_language")]
        language: String,
        /// Workflow reference the call runs under
        workflow_ref: String,
    },
    /// One frame of caller audio
    Media {
        session_id: String,
        /// Base64-encoded audio bytes
        payload: String,
    },
    /// One DTMF keypress
    Dtmf { session_id: String, digit: char },
    /// Close a call session
    Stop { session_id: String },
}

fn default_language() -> String {
    "en".to_string()
}

/// Outgoing frames to the telephony edge
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamOutgoing {
    /// Socket established
    Connected,
    /// Session opened, echoing its effective id
    Started { session_id: String },
    /// Agent response for a session
    Response {
        session_id: String,
        text: String,
        voice_tag: String,
        /// Base64-encoded audio, absent for text-only responses
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Session closed, with its final metrics
    Stopped {
        session_id: String,
        metrics: MetricsSnapshot,
    },
    /// A frame could not be honored
    Error { code: String, message: String },
}

/// Build the stream router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/calls", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one socket until it closes
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();

    // All frames to the client funnel through one channel so session
    // drivers never touch the socket directly.
    let (tx, mut rx) = mpsc::channel::<StreamOutgoing>(32);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&frame) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    if tx.send(StreamOutgoing::Connected).await.is_err() {
        send_task.abort();
        return;
    }
    tracing::info!("call stream connected");

    // Orchestrator responses arrive per-session; one pump converts them
    // to wire frames for the whole socket.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(32);
    let tx_for_pump = tx.clone();
    let pump_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = StreamOutgoing::Response {
                session_id: message.session_id,
                text: message.text,
                voice_tag: message.voice_tag,
                audio: message
                    .audio
                    .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
                timestamp: message.timestamp,
            };
            if tx_for_pump.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Sessions opened on this socket, torn down if it drops.
    let mut opened: HashSet<String> = HashSet::new();

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let frame: StreamIncoming = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring malformed frame");
                        continue;
                    }
                };
                handle_frame(&state, &tx, &outbound_tx, &mut opened, frame).await;
            }
            Message::Close(_) => {
                tracing::info!("call stream closed by peer");
                break;
            }
            _ => {}
        }
    }

    // Socket gone: every session it started goes with it.
    for session_id in opened {
        match state
            .orchestrator
            .stop_session(&session_id, EndReason::ChannelClosed)
            .await
        {
            Ok(metrics) => {
                tracing::info!(
                    session_id,
                    utterances = metrics.samples,
                    "session torn down with channel"
                );
            }
            Err(e) => tracing::debug!(session_id, error = %e, "session already gone"),
        }
    }

    pump_task.abort();
    send_task.abort();
}

/// Handle one parsed frame
async fn handle_frame(
    state: &Arc<ApiState>,
    tx: &mpsc::Sender<StreamOutgoing>,
    outbound_tx: &mpsc::Sender<OutboundMessage>,
    opened: &mut HashSet<String>,
    frame: StreamIncoming,
) {
    match frame {
        StreamIncoming::Start {
            session_id,
            language,
            workflow_ref,
        } => {
            let session_id =
                session_id.unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
            let result = state
                .orchestrator
                .start_session(&session_id, &language, &workflow_ref, outbound_tx.clone())
                .await;
            match result {
                Ok(_) => {
                    opened.insert(session_id.clone());
                    let _ = tx.send(StreamOutgoing::Started { session_id }).await;
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "failed to start session");
                    let _ = tx
                        .send(StreamOutgoing::Error {
                            code: "start_failed".to_string(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }

        StreamIncoming::Media {
            session_id,
            payload,
        } => {
            let audio = match base64::engine::general_purpose::STANDARD.decode(&payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "ignoring undecodable media frame");
                    return;
                }
            };
            match state
                .orchestrator
                .process_inbound_audio(&session_id, audio)
                .await
            {
                Ok(()) => {}
                // Audio for a session this relay does not know is
                // routine during teardown races; drop without noise.
                Err(Error::SessionNotFound(_)) => {
                    tracing::trace!(session_id, "dropping media for unknown session");
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "failed to process media frame");
                }
            }
        }

        StreamIncoming::Dtmf { session_id, digit } => {
            match state.orchestrator.process_dtmf(&session_id, digit).await {
                Ok(()) => {}
                Err(Error::SessionNotFound(_)) => {
                    tracing::trace!(session_id, "dropping dtmf for unknown session");
                }
                Err(e) => {
                    tracing::warn!(session_id, digit = %digit, error = %e, "failed to process dtmf");
                }
            }
        }

        StreamIncoming::Stop { session_id } => {
            match state
                .orchestrator
                .stop_session(&session_id, EndReason::Stopped)
                .await
            {
                Ok(metrics) => {
                    opened.remove(&session_id);
                    let _ = tx
                        .send(StreamOutgoing::Stopped {
                            session_id,
                            metrics,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "failed to stop session");
                    let _ = tx
                        .send(StreamOutgoing::Error {
                            code: "stop_failed".to_string(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }
}
