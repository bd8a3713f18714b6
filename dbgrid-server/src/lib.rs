//! Library half of the coordinator binary: the axum `Router` assembly lives
//! here so integration tests can drive it directly (a `[lib]` + `[[bin]]`
//! split), while `main.rs` stays a thin process entry point.

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

pub use config::Cli;
pub use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(handlers::query::handle_query))
        .route(
            "/distributed-query",
            post(handlers::distributed_query::handle_distributed_query),
        )
        .route("/status", get(handlers::status::handle_status))
        .route("/live", get(handlers::status::handle_live))
        .route("/ready", get(handlers::status::handle_ready))
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
