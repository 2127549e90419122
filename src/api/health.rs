//! Health and readiness endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness response with live counters
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub cached_responses: usize,
}

/// Serializable view of one provider's failover health
#[derive(Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub consecutive_failures: u32,
    pub in_cooldown: bool,
    pub latency_strikes: u32,
}

/// Serializable view of one live session
#[derive(Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub state: &'static str,
    pub language: String,
    pub turns: usize,
    pub idle_ms: u64,
}

/// Build the health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/providers/health", get(providers))
        .route("/api/sessions", get(sessions))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(state): State<Arc<ApiState>>) -> Json<ReadinessResponse> {
    Json(ReadinessResponse {
        status: "ready",
        active_sessions: state.orchestrator.sessions().len().await,
        cached_responses: state.orchestrator.cache().len(),
    })
}

async fn sessions(State(state): State<Arc<ApiState>>) -> Json<Vec<SessionSummary>> {
    let registry = state.orchestrator.sessions();
    let mut summaries = Vec::new();
    for id in registry.ids().await {
        if let Some(session) = registry.lookup(&id).await {
            summaries.push(SessionSummary {
                id,
                state: session.state().as_str(),
                language: session.language.clone(),
                turns: session.history_len(),
                idle_ms: u64::try_from(session.last_activity().elapsed().as_millis())
                    .unwrap_or(u64::MAX),
            });
        }
    }
    Json(summaries)
}

async fn providers(State(state): State<Arc<ApiState>>) -> Json<Vec<ProviderStatus>> {
    let now = tokio::time::Instant::now();
    let statuses = state
        .orchestrator
        .provider_health()
        .into_iter()
        .map(|h| ProviderStatus {
            in_cooldown: h.in_cooldown(now),
            id: h.id,
            consecutive_failures: h.consecutive_failures,
            latency_strikes: h.latency_strikes,
        })
        .collect();
    Json(statuses)
}
