//! Executor Shim: wraps the opaque embedded SQL engine with deterministic
//! row limits, thread pinning, result sanitation and profiling — the one
//! seam every concrete engine integration must satisfy.

pub mod datafusion_engine;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::time::timeout;

use crate::error::{CoordinatorError, ExecutorError};
use crate::model::{CellValue, NumThreads, QueryRequest, ResultSet, Row};

/// One cell as returned by the embedded engine, before the sanitation pass
/// collapses non-finite floats to null.
#[derive(Debug, Clone)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Default)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

/// The opaque embedded engine: invoked by the shim, returns columns and rows
/// or raises. A process-wide resource; callers obtain an independent
/// [`ExecutorSession`] per request so that one request's thread count or
/// profiling flag can never bleed into another's.
pub trait Executor: Send + Sync {
    fn session(&self) -> Box<dyn ExecutorSession>;
}

/// A single request's logical cursor onto the executor. Not `Send` across
/// awaits by design simplification: held exclusively by the one request task
/// that created it.
#[async_trait]
pub trait ExecutorSession: Send {
    async fn query(&mut self, sql: &str) -> Result<RawResultSet, ExecutorError>;
    fn current_threads(&self) -> u32;
    fn set_threads(&mut self, threads: u32);
    fn enable_profiling(&mut self, output_path: PathBuf);
    fn disable_profiling(&mut self);
    /// Non-blocking check for the profiling payload; `None` until it lands.
    fn take_profile(&mut self) -> Option<JsonValue>;
}

/// Restores a session's thread count on every exit path, including unwinding
/// panics, via the usual scoped-release RAII idiom. Owns the exclusive
/// borrow of the session it guards and exposes it through `Deref`/`DerefMut`
/// rather than leaving the original `&mut` reference reachable alongside
/// it — callers drive the session exclusively through the guard for as long
/// as the thread override should hold.
pub struct ThreadGuard<'a> {
    session: &'a mut dyn ExecutorSession,
    previous: u32,
}

impl<'a> ThreadGuard<'a> {
    pub fn apply(session: &'a mut dyn ExecutorSession, threads: u32) -> Self {
        let previous = session.current_threads();
        session.set_threads(threads);
        Self { session, previous }
    }
}

impl<'a> std::ops::Deref for ThreadGuard<'a> {
    type Target = dyn ExecutorSession + 'a;
    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl<'a> std::ops::DerefMut for ThreadGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.session
    }
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        self.session.set_threads(self.previous);
    }
}

/// Outcome of [`execute`]: either a normal result set or, in profiling mode,
/// the engine's raw profiling payload.
pub enum ExecuteOutcome {
    Rows(ResultSet),
    Profile { profile: JsonValue, hostname: String, execution_time: f64 },
}

const PROFILE_WAIT: Duration = Duration::from_secs(2);
const PROFILE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs one [`QueryRequest`] to completion against `session`: thread
/// override/restore, row-limit injection, profiling, and sanitation.
pub async fn execute(
    session: &mut dyn ExecutorSession,
    request: &QueryRequest,
    hostname: &str,
) -> Result<ExecuteOutcome, CoordinatorError> {
    let target_threads = match request.num_threads {
        NumThreads::Count(n) => n,
        NumThreads::Auto(_) => session.current_threads(),
    };
    let mut guard = ThreadGuard::apply(session, target_threads);

    let sql = inject_row_limit(&request.sql, request.max_rows);
    let started = Instant::now();

    if request.profiling {
        let profile_path = std::env::temp_dir().join(format!(
            "dbgrid-profile-{}.json",
            uuid::Uuid::new_v4()
        ));
        guard.enable_profiling(profile_path.clone());
        let outcome = guard.query(&sql).await;
        guard.disable_profiling();
        outcome.map_err(ExecutorError::from_query_error)?;

        let profile = wait_for_profile(&mut *guard).await?;
        let _ = std::fs::remove_file(&profile_path);
        return Ok(ExecuteOutcome::Profile {
            profile,
            hostname: hostname.to_string(),
            execution_time: started.elapsed().as_secs_f64(),
        });
    }

    let raw = guard.query(&sql).await.map_err(CoordinatorError::from)?;
    let execution_time = started.elapsed().as_secs_f64();
    let (columns, rows) = sanitize(raw);
    Ok(ExecuteOutcome::Rows(ResultSet {
        columns,
        rows,
        hostname: hostname.to_string(),
        execution_time,
    }))
}

async fn wait_for_profile(session: &mut dyn ExecutorSession) -> Result<JsonValue, CoordinatorError> {
    let poll = async {
        loop {
            if let Some(profile) = session.take_profile() {
                return profile;
            }
            tokio::time::sleep(PROFILE_POLL_INTERVAL).await;
        }
    };
    timeout(PROFILE_WAIT, poll)
        .await
        .map_err(|_| CoordinatorError::ProfilingUnavailable)
}

fn sanitize(raw: RawResultSet) -> (Vec<String>, Vec<Row>) {
    let rows = raw
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(sanitize_cell).collect())
        .collect();
    (raw.columns, rows)
}

fn sanitize_cell(value: RawValue) -> CellValue {
    match value {
        RawValue::Null => CellValue::Null,
        RawValue::Int(i) => CellValue::Int(i),
        RawValue::Float(f) if f.is_finite() => CellValue::Float(f),
        RawValue::Float(_) => CellValue::Null,
        RawValue::Bool(b) => CellValue::Bool(b),
        RawValue::Str(s) => CellValue::Str(s),
    }
}

/// Appends `LIMIT <max_rows>` to a `SELECT` that doesn't already have one.
/// Non-`SELECT` statements are passed through untouched. Both checks are
/// lexical — no full parse is needed for a keyword match, and a full parse
/// would also need to survive dialects the embedded engine accepts but
/// `sqlparser`'s `GenericDialect` may not.
fn inject_row_limit(sql: &str, max_rows: u64) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let first_token = trimmed.split_whitespace().next().unwrap_or("");
    if !first_token.eq_ignore_ascii_case("select") {
        return sql.to_string();
    }
    if contains_limit_keyword(trimmed) {
        return sql.to_string();
    }
    format!("{trimmed} LIMIT {max_rows}")
}

fn contains_limit_keyword(sql: &str) -> bool {
    strip_string_literals(sql)
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|tok| tok.eq_ignore_ascii_case("limit"))
}

fn strip_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars();
    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            let quote = c;
            for next in chars.by_ref() {
                if next == quote {
                    break;
                }
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

impl ExecutorError {
    /// `session.query` already returns `ExecutorError`; this just gives the
    /// profiling branch a named conversion point symmetric with the
    /// non-profiling branch's `CoordinatorError::from`.
    fn from_query_error(e: ExecutorError) -> CoordinatorError {
        CoordinatorError::from(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSession {
        threads: u32,
        profile: Option<JsonValue>,
        queries: Vec<String>,
    }

    #[async_trait]
    impl ExecutorSession for FakeSession {
        async fn query(&mut self, sql: &str) -> Result<RawResultSet, ExecutorError> {
            self.queries.push(sql.to_string());
            Ok(RawResultSet {
                columns: vec!["x".to_string()],
                rows: vec![vec![RawValue::Int(1)]],
            })
        }

        fn current_threads(&self) -> u32 {
            self.threads
        }

        fn set_threads(&mut self, threads: u32) {
            self.threads = threads;
        }

        fn enable_profiling(&mut self, _output_path: PathBuf) {
            self.profile = Some(serde_json::json!({"ok": true}));
        }

        fn disable_profiling(&mut self) {}

        fn take_profile(&mut self) -> Option<JsonValue> {
            self.profile.take()
        }
    }

    #[test]
    fn injects_limit_when_absent() {
        assert_eq!(
            inject_row_limit("SELECT * FROM t", 10),
            "SELECT * FROM t LIMIT 10"
        );
    }

    #[test]
    fn leaves_existing_limit_alone() {
        let sql = "SELECT * FROM t LIMIT 3";
        assert_eq!(inject_row_limit(sql, 10), sql);
    }

    #[test]
    fn ignores_limit_inside_string_literal() {
        assert_eq!(
            inject_row_limit("SELECT 'no limit here' FROM t", 10),
            "SELECT 'no limit here' FROM t LIMIT 10"
        );
    }

    #[test]
    fn leaves_non_select_untouched() {
        let sql = "EXPLAIN SELECT * FROM t";
        assert_eq!(inject_row_limit(sql, 10), sql);
    }

    #[test]
    fn sanitizes_non_finite_floats_to_null() {
        let raw = RawResultSet {
            columns: vec!["v".to_string()],
            rows: vec![
                vec![RawValue::Float(f64::NAN)],
                vec![RawValue::Float(f64::INFINITY)],
                vec![RawValue::Float(1.5)],
            ],
        };
        let (_, rows) = sanitize(raw);
        assert_eq!(rows[0][0], CellValue::Null);
        assert_eq!(rows[1][0], CellValue::Null);
        assert_eq!(rows[2][0], CellValue::Float(1.5));
    }

    #[tokio::test]
    async fn thread_guard_restores_previous_value_on_drop() {
        let mut session = FakeSession {
            threads: 4,
            ..Default::default()
        };
        {
            let guard = ThreadGuard::apply(&mut session, 1);
            assert_eq!(guard.current_threads(), 1);
        }
        assert_eq!(session.current_threads(), 4);
    }

    #[tokio::test]
    async fn execute_restores_threads_after_request() {
        let mut session = FakeSession {
            threads: 8,
            ..Default::default()
        };
        let request = QueryRequest {
            sql: "SELECT * FROM t".to_string(),
            profiling: false,
            max_rows: 50,
            num_threads: NumThreads::Count(2),
            lb_url: None,
            force_refresh_cache: false,
        };
        let outcome = execute(&mut session, &request, "host-a").await.unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Rows(_)));
        assert_eq!(session.current_threads(), 8);
    }

    #[tokio::test]
    async fn execute_profiling_mode_returns_profile() {
        let mut session = FakeSession::default();
        let request = QueryRequest {
            sql: "SELECT * FROM t".to_string(),
            profiling: true,
            max_rows: 50,
            num_threads: NumThreads::default(),
            lb_url: None,
            force_refresh_cache: false,
        };
        let outcome = execute(&mut session, &request, "host-a").await.unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Profile { .. }));
    }
}
