//! Callflow Relay - real-time audio relay for voice-agent phone calls
//!
//! This library provides the core functionality for the relay:
//! - Utterance boundary detection over inbound audio chunks
//! - A staged response pipeline (STT, cache, generation, TTS)
//! - Per-language provider failover with cooldown and reinstatement
//! - Silence supervision and per-session latency metrics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Telephony edge (WebSocket)            │
//! │      start  │  media  │  dtmf  │  stop              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                        │
//! │  Sessions │ Boundary detect │ Watchdog │ Metrics    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Response pipeline                      │
//! │   STT  │  Cache  │  LLM  │  Language  │  TTS        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod session;
pub mod supervisor;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
