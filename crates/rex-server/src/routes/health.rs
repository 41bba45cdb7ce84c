use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use rex::gateway::{ConfigReport, HealthReport};

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.gateway.health())
}

async fn config_handler(State(state): State<AppState>) -> Json<ConfigReport> {
    Json(state.gateway.config())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .with_state(state)
}
