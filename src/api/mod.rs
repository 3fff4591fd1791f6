pub mod health;
pub mod query;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query::query))
        .route("/health", get(health::health))
        .with_state(state)
}
