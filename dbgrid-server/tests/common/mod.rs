//! Shared fixtures for the end-to-end scenario tests in this directory:
//! building an [`AppState`] around a real embedded [`DataFusionExecutor`],
//! and writing small Hive-partitioned parquet datasets for it to discover
//! and scan, the same way `parquet::arrow::ArrowWriter` is used in
//! `dbgrid-core`'s own `cache.rs` tests.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, Int64Array};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use dbgrid_core::cache::CacheConfig;
use dbgrid_core::executor::datafusion_engine::DataFusionExecutor;
use dbgrid_server::AppState;
use parquet::arrow::ArrowWriter;

/// Writes one parquet file with a single `x: Int64` column under
/// `dataset_root/relative_path`, creating any `k=value` directories that
/// `relative_path` implies.
pub fn write_partition(dataset_root: &Path, relative_path: &str, x_values: &[i64]) {
    let file_path = dataset_root.join(relative_path);
    std::fs::create_dir_all(file_path.parent().expect("relative_path has a parent")).unwrap();

    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
    let column: ArrayRef = Arc::new(Int64Array::from(x_values.to_vec()));
    let batch = RecordBatch::try_new(schema.clone(), vec![column]).unwrap();

    let file = File::create(&file_path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// A fresh [`AppState`] with its own embedded executor and a cache rooted
/// at `cache_root`.
pub fn test_state(cache_root: &Path) -> Arc<AppState> {
    let executor = DataFusionExecutor::try_new().expect("engine init never touches I/O");
    Arc::new(AppState {
        executor: Arc::new(executor),
        cache: CacheConfig::new(cache_root.to_string_lossy().to_string(), 60, 0.5),
        http_client: reqwest::Client::new(),
        hostname: "test-host".to_string(),
    })
}
