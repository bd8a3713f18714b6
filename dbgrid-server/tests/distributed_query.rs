//! End-to-end scenarios for `/distributed-query`: a real embedded engine
//! discovers partitions against real local parquet files, while the worker
//! fan-out target is a `wiremock::MockServer` standing in for a sibling
//! `dbgrid-server` instance, the same split `dbgrid-core::scheduler`'s own
//! tests use.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{test_state, write_partition};
use dbgrid_core::model::{CellValue, ResultSet};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

/// Matches a worker request body containing `needle` verbatim, used to give
/// each mocked partition its own canned response.
struct SqlContains(&'static str);

impl wiremock::Match for SqlContains {
    fn matches(&self, request: &MockRequest) -> bool {
        std::str::from_utf8(&request.body)
            .map(|body| body.contains(self.0))
            .unwrap_or(false)
    }
}

fn worker_result(columns: &[&str], row: Vec<CellValue>, hostname: &str) -> ResultSet {
    ResultSet {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: vec![row],
        hostname: hostname.to_string(),
        execution_time: 0.01,
    }
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, payload)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sum_across_two_partitions() {
    let dataset_dir = tempfile::tempdir().unwrap();
    write_partition(dataset_dir.path(), "k=a/part.parquet", &[10]);
    write_partition(dataset_dir.path(), "k=b/part.parquet", &[32]);

    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(SqlContains("k = 'a'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(worker_result(
            &["sum_x"],
            vec![CellValue::Int(10)],
            "worker-a",
        )))
        .mount(&worker)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(SqlContains("k = 'b'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(worker_result(
            &["sum_x"],
            vec![CellValue::Int(32)],
            "worker-b",
        )))
        .mount(&worker)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let app = dbgrid_server::app(test_state(cache_dir.path()));

    let sql = format!(
        "SELECT SUM(x) AS sum_x FROM read_parquet('{}/**')",
        dataset_dir.path().display()
    );
    let (status, payload) = post_json(
        app,
        "/distributed-query",
        json!({ "sql": sql, "lb_url": worker.uri() }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["rows"], json!([[42]]));
    assert_eq!(payload["partitions_used"], json!(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn avg_decomposes_into_sum_and_count() {
    let dataset_dir = tempfile::tempdir().unwrap();
    write_partition(dataset_dir.path(), "k=a/part.parquet", &[2, 4]);
    write_partition(dataset_dir.path(), "k=b/part.parquet", &[6]);

    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(SqlContains("k = 'a'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(worker_result(
            &["s", "c"],
            vec![CellValue::Int(6), CellValue::Int(2)],
            "worker-a",
        )))
        .mount(&worker)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(SqlContains("k = 'b'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(worker_result(
            &["s", "c"],
            vec![CellValue::Int(6), CellValue::Int(1)],
            "worker-b",
        )))
        .mount(&worker)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let app = dbgrid_server::app(test_state(cache_dir.path()));

    let sql = format!(
        "SELECT SUM(x) AS s, COUNT(x) AS c FROM read_parquet('{}/**')",
        dataset_dir.path().display()
    );
    let (status, payload) = post_json(
        app,
        "/distributed-query",
        json!({ "sql": sql, "lb_url": worker.uri() }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["rows"], json!([[12, 3]]));
}

#[tokio::test]
async fn non_distributable_aggregate_is_rejected() {
    let cache_dir = tempfile::tempdir().unwrap();
    let app = dbgrid_server::app(test_state(cache_dir.path()));

    let (status, payload) = post_json(
        app,
        "/distributed-query",
        json!({
            "sql": "SELECT COUNT(DISTINCT x) FROM read_parquet('/tmp/does-not-matter/**')",
            "lb_url": "http://127.0.0.1:1",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        payload["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("non-distributive"),
        "unexpected body: {payload}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partition_failure_names_the_partition_and_fails_the_request() {
    let dataset_dir = tempfile::tempdir().unwrap();
    write_partition(dataset_dir.path(), "k=a/part.parquet", &[10]);
    write_partition(dataset_dir.path(), "k=b/part.parquet", &[32]);

    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(SqlContains("k = 'a'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(worker_result(
            &["sum_x"],
            vec![CellValue::Int(10)],
            "worker-a",
        )))
        .mount(&worker)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(SqlContains("k = 'b'"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&worker)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let app = dbgrid_server::app(test_state(cache_dir.path()));

    let sql = format!(
        "SELECT SUM(x) AS sum_x FROM read_parquet('{}/**')",
        dataset_dir.path().display()
    );
    let (status, payload) = post_json(
        app,
        "/distributed-query",
        json!({ "sql": sql, "lb_url": worker.uri() }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        payload["detail"].as_str().unwrap_or_default().contains("'b'"),
        "expected the failing partition to be named, got: {payload}"
    );
}
