//! Result Cache: content-addresses a normalized SQL string, reads through a
//! columnar cache file keyed by that hash, and admits a fresh result into
//! the cache only when it was expensive enough to be worth persisting.
//!
//! Uses [`crate::store_url`] so a cache root can be a plain filesystem
//! directory in development and an object-storage URI in production without
//! any code path changing. Cache entries are written and read as Arrow
//! `RecordBatch`es via `parquet::arrow` directly, rather than by routing a
//! `COPY ... TO` statement through the `Executor` contract, since the
//! coordinator already has the `ResultSet` in hand after execution and the
//! cache's file format is this crate's own concern, not the engine's.

use std::sync::Arc;

use chrono::Utc;
use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use sha2::{Digest, Sha256};

use crate::error::CoordinatorError;
use crate::model::{CellValue, ResultSet, Row};
use crate::store_url;

/// Column appended to every cached file recording when it was written.
/// Stored as Unix seconds (UTC) rather than an Arrow timestamp type, since
/// the only operation ever performed on it is a numeric `>=` comparison
/// against `now - ttl`.
const CACHED_AT_COLUMN: &str = "cached_at";
const CACHE_FILE_EXT: &str = "parquet";

pub const DEFAULT_TTL_MINUTES: i64 = 60;
pub const DEFAULT_ADMISSION_THRESHOLD_SECS: f64 = 0.5;

/// Where cache entries live and how long they remain valid.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// A local filesystem path or object-storage URI.
    pub root: String,
    pub ttl_minutes: i64,
    /// Wall-clock seconds a query must take before its result is worth
    /// caching (default 0.5s).
    pub admission_threshold_secs: f64,
}

impl CacheConfig {
    pub fn new(root: impl Into<String>, ttl_minutes: i64, admission_threshold_secs: f64) -> Self {
        Self {
            root: root.into(),
            ttl_minutes,
            admission_threshold_secs,
        }
    }
}

/// Normalizes `sql` before hashing: trim, then strip a trailing `;`. Two SQL
/// strings that normalize identically share a cache entry.
pub fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_string()
}

/// `sha256(normalize(sql))`, lower-hex encoded — the cache key, and the
/// `<hash>` component of the cache file's path.
pub fn cache_key(sql: &str) -> String {
    let digest = Sha256::digest(normalize(sql).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// `cached_date=<today UTC>/db_cache_<hash>.parquet`, relative to the cache
/// root.
fn relative_path(sql: &str) -> String {
    let date = Utc::now().date_naive();
    format!("cached_date={date}/db_cache_{}.{CACHE_FILE_EXT}", cache_key(sql))
}

async fn resolve(config: &CacheConfig, sql: &str) -> anyhow::Result<(Arc<dyn ObjectStore>, StorePath)> {
    let (store, root) = store_url::parse(&config.root)?;
    let full = StorePath::from(format!("{root}/{}", relative_path(sql)));
    Ok((store, full))
}

/// Whether a just-executed result is expensive enough to persist. A pure
/// predicate so the admission decision can be tested without touching
/// storage.
pub fn should_admit(config: &CacheConfig, result: &ResultSet) -> bool {
    result.execution_time > config.admission_threshold_secs
}

/// Attempts a cache read for `sql`. Returns `None` on any read error, a
/// missing file, or an empty (fully expired) result — every one of those
/// cases is a cache miss, never a request failure.
pub async fn read(config: &CacheConfig, sql: &str, hostname: &str) -> Option<ResultSet> {
    match read_inner(config, sql, hostname).await {
        Ok(Some(result)) => Some(result),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(error = %e, "cache read miss, falling through to execution");
            None
        }
    }
}

async fn read_inner(
    config: &CacheConfig,
    sql: &str,
    hostname: &str,
) -> anyhow::Result<Option<ResultSet>> {
    let (store, path) = resolve(config, sql).await?;
    let get_result = store.get(&path).await?;
    let bytes = get_result.bytes().await?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;

    let cutoff = (Utc::now() - chrono::Duration::minutes(config.ttl_minutes)).timestamp();
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Row> = Vec::new();

    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();
        if columns.is_empty() {
            columns = schema
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .filter(|name| name != CACHED_AT_COLUMN)
                .collect();
        }
        let cached_at_idx = schema.index_of(CACHED_AT_COLUMN).ok();
        for row_idx in 0..batch.num_rows() {
            if let Some(idx) = cached_at_idx {
                let cached_at = batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .map(|a| a.value(row_idx))
                    .unwrap_or(i64::MIN);
                if cached_at < cutoff {
                    continue;
                }
            }
            let mut row = Vec::with_capacity(columns.len());
            for (col_idx, field) in schema.fields().iter().enumerate() {
                if field.name() == CACHED_AT_COLUMN {
                    continue;
                }
                row.push(cell_from_array(batch.column(col_idx), row_idx));
            }
            rows.push(row);
        }
    }

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResultSet {
        columns,
        rows,
        hostname: hostname.to_string(),
        execution_time: 0.0,
    }))
}

/// Writes `result` to the cache entry for `sql`, plus a `cached_at = now()`
/// column, via an atomic `put` to the object store (write-whole-object /
/// provider-level atomic PUT). Overwrites any existing entry at the same
/// content-addressed path.
pub async fn write(config: &CacheConfig, sql: &str, result: &ResultSet) -> anyhow::Result<()> {
    let (store, path) = resolve(config, sql).await?;
    let now = Utc::now().timestamp();
    let batch = build_record_batch(&result.columns, &result.rows, now)?;

    let mut buffer = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
    }
    store.put(&path, bytes::Bytes::from(buffer)).await?;
    Ok(())
}

/// Read-through cache wrapper around `exec`: serves a fresh-enough cached
/// result unless `force_refresh` is set, otherwise runs `exec` and admits the
/// result in the background so the cache write never blocks the caller. A
/// write failure is logged and never propagated; the response the caller
/// already has is correct regardless of whether it gets persisted.
pub async fn execute_cached<F, Fut>(
    config: &CacheConfig,
    sql: &str,
    force_refresh: bool,
    hostname: &str,
    exec: F,
) -> Result<ResultSet, CoordinatorError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<ResultSet, CoordinatorError>>,
{
    if !force_refresh {
        if let Some(cached) = read(config, sql, hostname).await {
            return Ok(cached);
        }
    }

    let result = exec().await?;
    if should_admit(config, &result) {
        let config = config.clone();
        let sql = sql.to_string();
        let result_for_write = result.clone();
        tokio::spawn(async move {
            if let Err(e) = write(&config, &sql, &result_for_write).await {
                tracing::warn!(error = %e, "cache write failed, swallowing");
            }
        });
    }
    Ok(result)
}

fn infer_type(rows: &[Row], col_idx: usize) -> DataType {
    let (mut saw_int, mut saw_float, mut saw_bool, mut saw_str) = (false, false, false, false);
    for row in rows {
        match row.get(col_idx) {
            Some(CellValue::Int(_)) => saw_int = true,
            Some(CellValue::Float(_)) => saw_float = true,
            Some(CellValue::Bool(_)) => saw_bool = true,
            Some(CellValue::Str(_)) => saw_str = true,
            _ => {}
        }
    }
    if saw_str {
        DataType::Utf8
    } else if saw_float {
        DataType::Float64
    } else if saw_int {
        DataType::Int64
    } else if saw_bool {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn build_array(rows: &[Row], col_idx: usize, data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Int64 => Arc::new(Int64Array::from_iter(rows.iter().map(|r| match r.get(col_idx) {
            Some(CellValue::Int(i)) => Some(*i),
            _ => None,
        }))) as ArrayRef,
        DataType::Float64 => Arc::new(Float64Array::from_iter(rows.iter().map(|r| match r.get(col_idx) {
            Some(CellValue::Int(i)) => Some(*i as f64),
            Some(CellValue::Float(f)) => Some(*f),
            _ => None,
        }))) as ArrayRef,
        DataType::Boolean => Arc::new(BooleanArray::from_iter(rows.iter().map(|r| match r.get(col_idx) {
            Some(CellValue::Bool(b)) => Some(*b),
            _ => None,
        }))) as ArrayRef,
        _ => Arc::new(StringArray::from_iter(rows.iter().map(|r| match r.get(col_idx) {
            Some(CellValue::Str(s)) => Some(s.clone()),
            Some(CellValue::Int(i)) => Some(i.to_string()),
            Some(CellValue::Float(f)) => Some(f.to_string()),
            Some(CellValue::Bool(b)) => Some(b.to_string()),
            _ => None,
        }))) as ArrayRef,
    }
}

fn cell_from_array(array: &ArrayRef, row: usize) -> CellValue {
    if array.is_null(row) {
        return CellValue::Null;
    }
    match array.data_type() {
        DataType::Int64 => {
            CellValue::Int(array.as_any().downcast_ref::<Int64Array>().unwrap().value(row))
        }
        DataType::Float64 => {
            CellValue::Float(array.as_any().downcast_ref::<Float64Array>().unwrap().value(row))
        }
        DataType::Boolean => {
            CellValue::Bool(array.as_any().downcast_ref::<BooleanArray>().unwrap().value(row))
        }
        DataType::Utf8 => CellValue::Str(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap()
                .value(row)
                .to_string(),
        ),
        _ => CellValue::Null,
    }
}

fn build_record_batch(columns: &[String], rows: &[Row], cached_at: i64) -> anyhow::Result<RecordBatch> {
    let mut fields = Vec::with_capacity(columns.len() + 1);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
    for (idx, name) in columns.iter().enumerate() {
        let data_type = infer_type(rows, idx);
        fields.push(Field::new(name, data_type.clone(), true));
        arrays.push(build_array(rows, idx, &data_type));
    }
    fields.push(Field::new(CACHED_AT_COLUMN, DataType::Int64, false));
    arrays.push(Arc::new(Int64Array::from(vec![cached_at; rows.len()])) as ArrayRef);

    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_config(dir: &tempfile::TempDir) -> CacheConfig {
        CacheConfig::new(dir.path().to_string_lossy().to_string(), 60, 0.5)
    }

    fn sample_result() -> ResultSet {
        ResultSet {
            columns: vec!["sum_x".to_string()],
            rows: vec![vec![CellValue::Int(42)]],
            hostname: "host-a".to_string(),
            execution_time: 0.8,
        }
    }

    #[test]
    fn normalize_trims_and_strips_trailing_semicolon() {
        assert_eq!(normalize("  SELECT 1;  "), "SELECT 1");
        assert_eq!(normalize("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn cache_key_is_stable_across_normalization_variants() {
        assert_eq!(cache_key("SELECT 1;"), cache_key("  SELECT 1  "));
        assert_ne!(cache_key("SELECT 1"), cache_key("SELECT 2"));
    }

    #[test]
    fn should_admit_checks_the_threshold() {
        let config = CacheConfig::new("/tmp/cache", 60, 0.5);
        let mut result = sample_result();
        result.execution_time = 0.2;
        assert!(!should_admit(&config, &result));
        result.execution_time = 0.8;
        assert!(should_admit(&config, &result));
    }

    #[tokio::test]
    async fn write_then_read_round_trips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        let result = sample_result();
        write(&config, "SELECT SUM(x) AS sum_x FROM t", &result)
            .await
            .unwrap();

        let cached = read(&config, "SELECT SUM(x) AS sum_x FROM t", "host-b")
            .await
            .expect("expected a cache hit");
        assert_eq!(cached.columns, vec!["sum_x".to_string()]);
        assert_eq!(cached.rows, vec![vec![CellValue::Int(42)]]);
        assert_eq!(cached.hostname, "host-b");
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        // Negative TTL: the cutoff is in the future, so anything just
        // written is immediately "too old".
        let config = CacheConfig::new(dir.path().to_string_lossy().to_string(), -1, 0.5);
        let result = sample_result();
        write(&config, "SELECT 1", &result).await.unwrap();

        assert!(read(&config, "SELECT 1", "host-b").await.is_none());
    }

    #[tokio::test]
    async fn missing_entry_is_a_miss_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        assert!(read(&config, "SELECT 1", "host-b").await.is_none());
    }

    #[tokio::test]
    async fn execute_cached_serves_a_fresh_hit_without_calling_exec() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        let sql = "SELECT COUNT(*) AS c FROM t";
        write(&config, sql, &sample_result()).await.unwrap();

        let calls = AtomicUsize::new(0);
        let outcome = execute_cached(&config, sql, false, "host-b", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample_result())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.rows, vec![vec![CellValue::Int(42)]]);
    }

    #[tokio::test]
    async fn execute_cached_force_refresh_bypasses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        let sql = "SELECT COUNT(*) AS c FROM t";
        write(&config, sql, &sample_result()).await.unwrap();

        let calls = AtomicUsize::new(0);
        execute_cached(&config, sql, true, "host-b", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample_result())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
