//! `POST /query`: runs one statement against the embedded engine, through
//! the result cache unless profiling was requested. Profiling bypasses the
//! cache entirely, since a profile is the point of the request and caching
//! it would hide the very thing the caller asked to measure.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use dbgrid_core::cache;
use dbgrid_core::executor::{execute, ExecuteOutcome, Executor as _};
use dbgrid_core::model::{ProfilingResultSet, QueryRequest, ResultSet};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(untagged)]
pub enum QueryResponseBody {
    Rows(ResultSet),
    Profile(ProfilingResultSet),
}

pub async fn handle_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponseBody>, ApiError> {
    if request.profiling {
        let mut session = state.executor.session();
        return match execute(&mut *session, &request, &state.hostname).await? {
            ExecuteOutcome::Profile {
                profile,
                hostname,
                execution_time,
            } => Ok(Json(QueryResponseBody::Profile(ProfilingResultSet {
                profiling: profile,
                hostname,
                execution_time,
            }))),
            ExecuteOutcome::Rows(result) => Ok(Json(QueryResponseBody::Rows(result))),
        };
    }

    let executor = state.executor.clone();
    let hostname = state.hostname.clone();
    let force_refresh = request.force_refresh_cache;
    let sql = request.sql.clone();
    let request_for_exec = request.clone();

    let result = cache::execute_cached(&state.cache, &sql, force_refresh, &hostname, move || async move {
        let mut session = executor.session();
        match execute(&mut *session, &request_for_exec, &hostname).await? {
            ExecuteOutcome::Rows(result) => Ok(result),
            ExecuteOutcome::Profile { .. } => {
                unreachable!("request.profiling was already checked above")
            }
        }
    })
    .await?;

    Ok(Json(QueryResponseBody::Rows(result)))
}
