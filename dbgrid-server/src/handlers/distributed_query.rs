//! `POST /distributed-query`: classifies, discovers partitions, rewrites one
//! sub-query per partition, fans out, and merges — introspection through
//! merging, end to end.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use dbgrid_core::error::CoordinatorError;
use dbgrid_core::executor::Executor as _;
use dbgrid_core::introspector::{self, ensure_distributable};
use dbgrid_core::merge;
use dbgrid_core::model::{DistributedResultSet, QueryRequest};
use dbgrid_core::partition;
use dbgrid_core::rewrite;
use dbgrid_core::scheduler::{self, SubQuery};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn handle_distributed_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<DistributedResultSet>, ApiError> {
    let started = Instant::now();

    let lb_url = request.lb_url.clone().ok_or_else(|| {
        ApiError(CoordinatorError::MalformedQuery(
            "lb_url is required for /distributed-query".to_string(),
        ))
    })?;

    let classification = introspector::classify(&request.sql)?;
    ensure_distributable(&classification)?;
    let column_kinds = introspector::column_kinds(&request.sql)?;

    let descriptor = {
        let mut session = state.executor.session();
        partition::discover(&mut *session, &classification.dataset_ref).await?
    };

    let sub_queries: Vec<SubQuery> = descriptor
        .values
        .iter()
        .map(|value| {
            let sql = rewrite::rewrite(&request.sql, &descriptor.column, value)?;
            Ok(SubQuery {
                partition_value: value.clone(),
                sql,
            })
        })
        .collect::<Result<_, CoordinatorError>>()?;
    let partitions_used = sub_queries.len();

    let results = scheduler::run(
        &state.http_client,
        &sub_queries,
        &lb_url,
        &request,
        scheduler::DEFAULT_CONCURRENCY_LIMIT,
        scheduler::DEFAULT_TIMEOUT,
    )
    .await?;

    // Distributed requests never involve GROUP BY (§1's scope), so every
    // partition response is exactly one aggregate row.
    let partition_rows: Vec<_> = results
        .iter()
        .map(|r| r.rows.first().cloned().unwrap_or_default())
        .collect();
    let outcome = merge::merge(&partition_rows, &column_kinds);

    Ok(Json(DistributedResultSet {
        columns: column_kinds.into_iter().map(|c| c.name).collect(),
        rows: vec![outcome.row],
        hostname: state.hostname.clone(),
        execution_time: started.elapsed().as_secs_f64(),
        partitions_used,
    }))
}
