//! REST API server for the crypto insight agent
//!
//! Exposes the controller via HTTP. The tagged query outcome is rendered
//! to text only here, at the outermost boundary.

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::controller::ControllerAgent;
use crate::models::QueryOutcome;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub status: String,
    pub timestamp: String,
}

impl AskResponse {
    fn from_outcome(outcome: &QueryOutcome) -> Self {
        let status = match outcome {
            QueryOutcome::Answered { .. } => "answered",
            QueryOutcome::NoAnswer => "no_answer",
            QueryOutcome::Inconclusive => "inconclusive",
            QueryOutcome::Failed { .. } => "failed",
        };

        Self {
            answer: outcome.render(),
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<ControllerAgent>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn ask(
    State(state): State<ApiState>,
    Json(req): Json<AskRequest>,
) -> (StatusCode, Json<AskResponse>) {
    info!("Received question: {}", req.question);

    let outcome = state.controller.process_query(&req.question).await;

    let status = match outcome {
        QueryOutcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    (status, Json(AskResponse::from_outcome(&outcome)))
}

pub fn create_router(controller: Arc<ControllerAgent>) -> Router {
    let state = ApiState { controller };

    Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    controller: Arc<ControllerAgent>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(controller);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_rendering() {
        let answered = AskResponse::from_outcome(&QueryOutcome::Answered {
            answer: "Bitcoin is up.".to_string(),
        });
        assert_eq!(answered.answer, "Bitcoin is up.");
        assert_eq!(answered.status, "answered");

        let failed = AskResponse::from_outcome(&QueryOutcome::Failed {
            kind: "llm".to_string(),
            message: "quota exceeded".to_string(),
        });
        assert_eq!(failed.status, "failed");
        assert!(failed.answer.starts_with("[error:llm]"));
        assert!(failed.answer.contains("quota exceeded"));
    }
}
