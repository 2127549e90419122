//! HTTP endpoint tests over the assembled router

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tokio::sync::mpsc;
use tower::ServiceExt;

use callflow_relay::Orchestrator;
use callflow_relay::api::{ApiState, health};
use callflow_relay::events::{EventSink, TracingSink};
use callflow_relay::providers::ProviderRegistry;
use callflow_relay::workflow::{StaticWorkflowSource, WorkflowContext, WorkflowSource};

mod common;
use common::{MockLanguageModel, MockSynthesizer, shared, test_config};

/// Build a test router around an orchestrator with mock providers
fn build_test_router() -> (axum::Router, Arc<Orchestrator>) {
    let mut registry = ProviderRegistry::new();
    registry.register_language_model("llm-a", shared(MockLanguageModel::new()));
    registry.register_synthesizer("tts-a", shared(MockSynthesizer::new()));

    let context = WorkflowContext {
        instructions: "Be helpful and brief.".to_string(),
        ..WorkflowContext::default()
    };
    let workflows: Arc<dyn WorkflowSource> =
        Arc::new(StaticWorkflowSource::new().with_context("wf-1", context));
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    let orchestrator = Arc::new(
        Orchestrator::new(test_config(), Arc::new(registry), workflows, events)
            .expect("orchestrator must build"),
    );
    let state = Arc::new(ApiState {
        orchestrator: orchestrator.clone(),
    });
    (health::router(state), orchestrator)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (app, _orchestrator) = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn ready_endpoint_counts_active_sessions() {
    let (app, orchestrator) = build_test_router();
    let (out_tx, _out_rx) = mpsc::channel(8);
    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["active_sessions"], 1);
}

#[tokio::test]
async fn sessions_endpoint_lists_live_sessions() {
    let (app, orchestrator) = build_test_router();
    let (out_tx, _out_rx) = mpsc::channel(8);
    orchestrator
        .start_session("s1", "en", "wf-1", out_tx)
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let sessions = json.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], "s1");
    assert_eq!(sessions[0]["language"], "en");
    assert_eq!(sessions[0]["state"], "active");
}

#[tokio::test]
async fn provider_health_covers_registered_backends() {
    let (app, _orchestrator) = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/providers/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json.is_array());
}
