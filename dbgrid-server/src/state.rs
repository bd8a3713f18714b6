//! Shared application state, handed to every handler via axum's
//! `State` extractor.

use std::sync::Arc;

use dbgrid_core::cache::CacheConfig;
use dbgrid_core::executor::Executor;

pub struct AppState {
    pub executor: Arc<dyn Executor>,
    pub cache: CacheConfig,
    pub http_client: reqwest::Client,
    pub hostname: String,
}
