// Export route modules
pub mod chat;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// All routes, mounted under `/api`.
pub fn configure(state: AppState) -> Router {
    Router::new().nest(
        "/api",
        Router::new()
            .merge(chat::routes(state.clone()))
            .merge(health::routes(state)),
    )
}
