// Operator HTTP surface for the orchestrator

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::orchestrator::{BurstDecision, Orchestrator};

pub type AppState = Arc<Orchestrator>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/notifications", get(notifications))
        .route("/agents", get(list_agents))
        .route("/burst", post(trigger_burst))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let snapshot = state.get_status().await;
    serde_json::to_value(snapshot)
        .map(Json)
        .map_err(|_e| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Healing notifications awaiting operator attention, newest first.
async fn notifications(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let notifications = state.notifications().await;
    Ok(Json(serde_json::json!({
        "count": notifications.len(),
        "notifications": notifications,
    })))
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let agents = state.agents().await.map_err(|e| {
        error!("Failed to list agents: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(serde_json::json!({
        "count": agents.len(),
        "agents": agents,
    })))
}

/// Run a manual burst. Ignores the pause flag and the daily slot.
async fn trigger_burst(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let decision = state.trigger_burst_now().await;
    let code = match &decision {
        BurstDecision::AlreadyRunning => StatusCode::CONFLICT,
        BurstDecision::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    if code != StatusCode::OK {
        return Err(code);
    }
    serde_json::to_value(decision)
        .map(Json)
        .map_err(|_e| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn pause(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    set_paused(state, true).await
}

async fn resume(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    set_paused(state, false).await
}

async fn set_paused(state: AppState, paused: bool) -> Result<Json<Value>, StatusCode> {
    state.set_paused(paused).await.map_err(|e| {
        error!("Failed to toggle pause: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "paused": paused,
    })))
}
