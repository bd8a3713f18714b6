//! Error taxonomy built on `thiserror`, with manual HTTP-status mapping
//! downstream. The HTTP framing itself (axum's `IntoResponse`) lives in
//! `dbgrid-server`, which is the only crate that knows about status codes;
//! this enum only carries the classification.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("non-distributive aggregate in query: {0}")]
    NonDistributiveAggregate(String),

    #[error("dataset is not partitioned: {0}")]
    UnpartitionedDataset(String),

    #[error("partition '{partition}' failed: {cause}")]
    PartitionFailure { partition: String, cause: String },

    #[error("executor error: {0}")]
    ExecutorFailure(#[from] ExecutorError),

    #[error("profiling output did not appear within the timeout")]
    ProfilingUnavailable,
}

/// Errors raised by the embedded `Executor`. Kept distinct from
/// `CoordinatorError` so executor implementations don't need to depend on
/// the coordinator's HTTP-facing taxonomy.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("SQL error: {0}")]
    Sql(String),

    #[error("engine-internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoordinatorError {
    /// Whether this error originates from the user's SQL (→ 400) or from
    /// infrastructure (→ 500).
    pub fn is_user_error(&self) -> bool {
        match self {
            CoordinatorError::MalformedQuery(_)
            | CoordinatorError::NonDistributiveAggregate(_)
            | CoordinatorError::UnpartitionedDataset(_) => true,
            CoordinatorError::ExecutorFailure(ExecutorError::Sql(_)) => true,
            CoordinatorError::ExecutorFailure(ExecutorError::Internal(_)) => false,
            CoordinatorError::PartitionFailure { .. } => false,
            CoordinatorError::ProfilingUnavailable => false,
        }
    }
}
