//! Environment/CLI configuration surface: a `clap::Parser` struct with the
//! `env` feature enabled so every flag doubles as an environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use dbgrid_core::cache::{CacheConfig, DEFAULT_ADMISSION_THRESHOLD_SECS};

#[derive(Parser, Debug)]
#[clap(name = "dbgrid-server")]
#[clap(
    about = "Distributed SQL query coordinator over an embedded analytical engine",
    version,
    author
)]
pub struct Cli {
    #[clap(long, env = "LISTEN_ENDPOINT_HTTP", default_value = "0.0.0.0:8080")]
    pub listen_endpoint_http: SocketAddr,

    /// SQL file executed once against the embedded engine at startup. An
    /// absent file is skipped, not an error.
    #[clap(long, env = "INIT_SQL_PATH", default_value = "./init.sql")]
    pub init_sql_path: PathBuf,

    #[clap(long, env = "CACHE_OUTPUT_BASE", default_value = "./db_cache")]
    pub cache_output_base: String,

    #[clap(long, env = "CACHE_TTL_MINUTES", default_value_t = 60)]
    pub cache_ttl_minutes: i64,

    /// Forwarded to the UI collaborator only; never consumed by core logic.
    #[clap(long, env = "BACKEND_URL")]
    pub backend_url: Option<String>,
}

impl Cli {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(
            self.cache_output_base.clone(),
            self.cache_ttl_minutes,
            DEFAULT_ADMISSION_THRESHOLD_SECS,
        )
    }
}
