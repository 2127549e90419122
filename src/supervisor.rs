//! Silence and fallback supervision
//!
//! Each session runs one watchdog task owning two deadlines: the silence
//! budget (no caller activity for too long) and the fallback window
//! (buffered audio that never reached an utterance boundary). The
//! orchestrator reports activity through [`ActivitySignal`]s; the
//! watchdog reacts by queueing work on the session's driver.
//!
//! Re-engagement prompts dispatched by the watchdog itself do not count
//! as activity, so an unresponsive caller accumulates consecutive silent
//! periods until the farewell fires.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::SupervisorConfig;
use crate::session::{CallSession, SessionCommand, SessionState};

/// Activity reports consumed by the watchdog
#[derive(Debug, Clone, Copy)]
pub enum ActivitySignal {
    /// A media or dtmf frame arrived from the caller
    Inbound,
    /// The driver finished processing a caller utterance
    PipelineDone,
    /// The ingest buffer went empty to non-empty; fallback window opens
    BufferFilled {
        /// When the fallback flush fires for this buffer
        deadline: Instant,
    },
    /// The ingest buffer was consumed; fallback window closes
    BufferCleared,
}

/// Run one session's watchdog until teardown.
///
/// Exits when the signal channel closes, or after dispatching the
/// farewell once the caller stays silent past the configured number of
/// periods.
pub async fn run_watchdog(
    session: Arc<CallSession>,
    config: SupervisorConfig,
    mut signals: mpsc::Receiver<ActivitySignal>,
) {
    let mut silence_deadline = Instant::now() + config.silence_budget;
    let mut silent_periods: u32 = 0;
    let mut fallback: Option<Instant> = None;

    loop {
        let fallback_sleep = async {
            match fallback {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            signal = signals.recv() => match signal {
                None => break,
                Some(ActivitySignal::Inbound | ActivitySignal::PipelineDone) => {
                    session.touch();
                    silence_deadline = Instant::now() + config.silence_budget;
                    silent_periods = 0;
                }
                Some(ActivitySignal::BufferFilled { deadline }) => {
                    fallback = Some(deadline);
                }
                Some(ActivitySignal::BufferCleared) => {
                    // A frame can land between the buffer draining and this
                    // signal arriving. The detector is the source of truth,
                    // so a stale clear must not disarm a live window.
                    fallback = session.fallback_deadline();
                }
            },

            () = tokio::time::sleep_until(silence_deadline) => {
                silent_periods += 1;

                if silent_periods >= config.max_silent_periods {
                    tracing::info!(
                        session_id = %session.id,
                        silent_periods,
                        "silence budget exhausted, saying farewell"
                    );
                    session.set_state(SessionState::Closing);
                    let _ = session
                        .send_command(SessionCommand::Speak {
                            text: config.farewell.clone(),
                            then_close: true,
                        })
                        .await;
                    break;
                }

                tracing::debug!(
                    session_id = %session.id,
                    silent_periods,
                    "silent period elapsed, re-engaging caller"
                );
                if session
                    .send_command(SessionCommand::Speak {
                        text: config.reengagement_prompt.clone(),
                        then_close: false,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                silence_deadline = Instant::now() + config.silence_budget;
            },

            () = fallback_sleep => {
                fallback = None;
                if let Some(partial) = session.take_fallback_utterance() {
                    tracing::debug!(
                        session_id = %session.id,
                        bytes = partial.total_bytes(),
                        "fallback window elapsed, flushing partial utterance"
                    );
                    if session
                        .send_command(SessionCommand::Utterance(partial))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            },
        }
    }

    tracing::debug!(session_id = %session.id, "watchdog exiting");
}
