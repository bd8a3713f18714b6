//! Concrete [`Executor`] backed by an embedded `datafusion` `SessionContext`
//! exposing `execute(sql) -> (columns, rows)`. Registers a `parquet_read` /
//! `read_parquet` table function backed directly by `object_store`, instead
//! of going through `datafusion`'s own `ListingTable` machinery, so the
//! coordinator never needs this engine's query planner to understand Hive
//! partitioning — partition columns are attached by hand from the same
//! path-parsing logic the partition discoverer uses.
//!
//! The engine's internal query planning/optimization is not part of the
//! contract the rest of this crate depends on — only
//! `execute(sql) -> (columns, rows)` is.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use datafusion::catalog::{Session, TableFunctionImpl};
use datafusion::datasource::memory::MemTable;
use datafusion::datasource::{TableProvider, TableType};
use datafusion::error::{DataFusionError, Result as DFResult};
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::Expr;
use datafusion::physical_plan::ExecutionPlan;
use datafusion::scalar::ScalarValue;
use futures::{StreamExt, TryStreamExt};
use object_store::{path::Path as StorePath, ObjectMeta, ObjectStore};
use parquet::arrow::async_reader::{ParquetObjectReader, ParquetRecordBatchStreamBuilder};
use serde_json::Value as JsonValue;

use crate::error::ExecutorError;
use crate::executor::{Executor, ExecutorSession, RawResultSet, RawValue};
use crate::partition::{first_partition_segment, WITH_FILENAME_SENTINEL};

pub struct DataFusionExecutor {
    ctx: SessionContext,
}

impl DataFusionExecutor {
    pub fn try_new() -> anyhow::Result<Self> {
        let ctx = SessionContext::new();
        ctx.register_udtf("read_parquet", Arc::new(ParquetReadTableFunction));
        ctx.register_udtf("parquet_read", Arc::new(ParquetReadTableFunction));
        Ok(Self { ctx })
    }

    /// Runs `init_sql_path` against the shared base session once at startup.
    /// An absent file is skipped, not an error.
    pub async fn run_init_sql(&self, init_sql_path: &std::path::Path) -> anyhow::Result<()> {
        if !init_sql_path.exists() {
            tracing::info!(path = %init_sql_path.display(), "no init SQL file, skipping");
            return Ok(());
        }
        let sql = tokio::fs::read_to_string(init_sql_path).await?;
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            self.ctx.sql(statement).await?.collect().await?;
        }
        Ok(())
    }
}

impl Executor for DataFusionExecutor {
    fn session(&self) -> Box<dyn ExecutorSession> {
        // A fresh `SessionState` copy per request: catalogs/registered UDTFs
        // are inherited, but config mutations (thread count, profiling) made
        // by this session can never bleed into a sibling request's session.
        let isolated = SessionContext::new_with_state(self.ctx.state());
        Box::new(DataFusionSession {
            ctx: isolated,
            threads: default_thread_count(),
            profiling: None,
            pending_profile: None,
        })
    }
}

fn default_thread_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

struct DataFusionSession {
    ctx: SessionContext,
    threads: u32,
    profiling: Option<PathBuf>,
    pending_profile: Option<JsonValue>,
}

#[async_trait]
impl ExecutorSession for DataFusionSession {
    async fn query(&mut self, sql: &str) -> Result<RawResultSet, ExecutorError> {
        if self.profiling.is_some() {
            let explain_sql = format!("EXPLAIN ANALYZE {sql}");
            let df = self.ctx.sql(&explain_sql).await.map_err(to_sql_error)?;
            let batches = df.collect().await.map_err(to_sql_error)?;
            let plan_text: Vec<String> = batches
                .iter()
                .flat_map(|b| (0..b.num_rows()).map(move |r| (b, r)))
                .filter_map(|(b, r)| display_cell(b.column(b.num_columns() - 1), r).ok())
                .collect();
            self.pending_profile = Some(serde_json::json!({ "plan": plan_text }));
            return Ok(RawResultSet::default());
        }
        let df = self.ctx.sql(sql).await.map_err(to_sql_error)?;
        let batches = df.collect().await.map_err(to_sql_error)?;
        batches_to_raw(&batches)
    }

    fn current_threads(&self) -> u32 {
        self.threads
    }

    fn set_threads(&mut self, threads: u32) {
        // Wiring this into `datafusion`'s own `target_partitions` is
        // possible, but the engine's internal parallelism tuning is out of
        // this contract's scope.
        self.threads = threads;
    }

    fn enable_profiling(&mut self, output_path: PathBuf) {
        self.profiling = Some(output_path);
    }

    fn disable_profiling(&mut self) {
        self.profiling = None;
    }

    fn take_profile(&mut self) -> Option<JsonValue> {
        self.pending_profile.take()
    }
}

fn to_sql_error(e: DataFusionError) -> ExecutorError {
    ExecutorError::Sql(e.to_string())
}

fn to_internal_error<E: std::fmt::Display>(e: E) -> ExecutorError {
    ExecutorError::Internal(anyhow::anyhow!(e.to_string()))
}

fn batches_to_raw(batches: &[RecordBatch]) -> Result<RawResultSet, ExecutorError> {
    let Some(schema) = batches.first().map(|b| b.schema()) else {
        return Ok(RawResultSet::default());
    };
    let columns = schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let mut rows = Vec::new();
    for batch in batches {
        for row_idx in 0..batch.num_rows() {
            let mut row = Vec::with_capacity(batch.num_columns());
            for col_idx in 0..batch.num_columns() {
                row.push(cell_value(batch.column(col_idx), row_idx)?);
            }
            rows.push(row);
        }
    }
    Ok(RawResultSet { columns, rows })
}

/// Converts one Arrow cell to the wire-level [`RawValue`]. Integers,
/// floats, booleans and UTF-8 map to their native JSON shape; every other
/// Arrow type (decimal, date, timestamp, ...) is rendered through Arrow's
/// own display formatter, so temporal and high-precision decimal values
/// come out as strings.
fn cell_value(array: &ArrayRef, row: usize) -> Result<RawValue, ExecutorError> {
    if array.is_null(row) {
        return Ok(RawValue::Null);
    }
    match array.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let casted =
                datafusion::arrow::compute::cast(array, &DataType::Int64).map_err(to_internal_error)?;
            let arr = casted
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("cast to Int64Array");
            Ok(RawValue::Int(arr.value(row)))
        }
        DataType::UInt64 => {
            let arr = array
                .as_any()
                .downcast_ref::<UInt64Array>()
                .expect("UInt64Array");
            Ok(RawValue::Int(arr.value(row) as i64))
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let casted = datafusion::arrow::compute::cast(array, &DataType::Float64)
                .map_err(to_internal_error)?;
            let arr = casted
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("cast to Float64Array");
            Ok(RawValue::Float(arr.value(row)))
        }
        DataType::Boolean => {
            let arr = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .expect("BooleanArray");
            Ok(RawValue::Bool(arr.value(row)))
        }
        _ => Ok(RawValue::Str(display_cell(array, row)?)),
    }
}

fn display_cell(array: &ArrayRef, row: usize) -> Result<String, ExecutorError> {
    let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())
        .map_err(to_internal_error)?;
    Ok(formatter.value(row).to_string())
}

/// The `read_parquet` / `parquet_read` table function. The second,
/// coordinator-only argument is [`WITH_FILENAME_SENTINEL`] — see
/// `crate::partition` for why this is a plain positional string literal
/// rather than a named `filename=true` argument.
#[derive(Debug)]
struct ParquetReadTableFunction;

impl TableFunctionImpl for ParquetReadTableFunction {
    fn call(&self, args: &[Expr]) -> DFResult<Arc<dyn TableProvider>> {
        let path = literal_utf8(args.first()).ok_or_else(|| {
            DataFusionError::Plan(
                "parquet_read/read_parquet requires a string literal path".to_string(),
            )
        })?;
        let with_filename = args
            .get(1)
            .and_then(literal_utf8)
            .is_some_and(|arg| arg == WITH_FILENAME_SENTINEL);

        let (store, prefix) = crate::store_url::parse_glob_prefix(&path)
            .map_err(|e| DataFusionError::External(e.into()))?;

        // `TableFunctionImpl::call` is synchronous but listing files and
        // peeking the first file's schema requires I/O; `block_in_place` is
        // the standard way to run blocking/bridged-async work from inside an
        // already-running multi-threaded Tokio runtime without starving it.
        let (files, schema, partition_key) = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(list_and_infer_schema(&store, &prefix, with_filename))
        })
        .map_err(|e| DataFusionError::External(e.into()))?;

        Ok(Arc::new(ParquetReadTable {
            store,
            files,
            schema,
            with_filename,
            partition_key,
        }))
    }
}

fn literal_utf8(expr: Option<&Expr>) -> Option<String> {
    let Expr::Literal(scalar, ..) = expr? else {
        return None;
    };
    match scalar {
        ScalarValue::Utf8(Some(s))
        | ScalarValue::LargeUtf8(Some(s))
        | ScalarValue::Utf8View(Some(s)) => Some(s.clone()),
        _ => None,
    }
}

async fn list_and_infer_schema(
    store: &Arc<dyn ObjectStore>,
    prefix: &StorePath,
    with_filename: bool,
) -> anyhow::Result<(Vec<ObjectMeta>, SchemaRef, Option<String>)> {
    let entries: Vec<ObjectMeta> = store
        .list(Some(prefix))
        .filter(|entry| {
            let is_parquet = entry
                .as_ref()
                .map(|m| m.location.as_ref().to_lowercase().ends_with(".parquet"))
                .unwrap_or(true);
            futures::future::ready(is_parquet)
        })
        .try_collect()
        .await?;
    if entries.is_empty() {
        anyhow::bail!("no parquet files found under '{prefix}'");
    }

    let reader = ParquetObjectReader::new(store.clone(), entries[0].clone());
    let builder = ParquetRecordBatchStreamBuilder::new(reader).await?;
    let mut fields: Vec<Field> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();

    let partition_key = if with_filename {
        fields.push(Field::new("filename", DataType::Utf8, false));
        None
    } else if let Some((key, _)) = first_partition_segment(entries[0].location.as_ref()) {
        fields.push(Field::new(key.clone(), DataType::Utf8, true));
        Some(key)
    } else {
        None
    };

    Ok((entries, Arc::new(Schema::new(fields)), partition_key))
}

/// Materializes the matching parquet files into Arrow `RecordBatch`es,
/// attaching either a `filename` pseudo-column (discovery mode) or the
/// dataset's partition-key column (query mode) by hand, then delegates
/// actual scan/projection/filter/limit handling to `datafusion`'s own
/// in-memory `MemTable`.
#[derive(Debug)]
struct ParquetReadTable {
    store: Arc<dyn ObjectStore>,
    files: Vec<ObjectMeta>,
    schema: SchemaRef,
    with_filename: bool,
    partition_key: Option<String>,
}

impl ParquetReadTable {
    /// Only appends an extra column when the schema inferred by
    /// `list_and_infer_schema` actually gained one (`filename` mode, or a
    /// Hive partition key found on the first file) — otherwise the
    /// `RecordBatch`'s column count would outrun its own schema's field
    /// count on a flat, unpartitioned dataset.
    fn attach_extra_column(&self, batch: RecordBatch, meta: &ObjectMeta) -> DFResult<RecordBatch> {
        let num_rows = batch.num_rows();
        let mut columns = batch.columns().to_vec();
        if self.with_filename {
            columns.push(Arc::new(StringArray::from(vec![
                meta.location.to_string();
                num_rows
            ])) as ArrayRef);
        } else if self.partition_key.is_some() {
            let value = first_partition_segment(meta.location.as_ref()).map(|(_, v)| v);
            columns.push(Arc::new(StringArray::from(vec![value.as_deref(); num_rows])) as ArrayRef);
        }
        RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| DataFusionError::External(Box::new(e)))
    }
}

#[async_trait]
impl TableProvider for ParquetReadTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    async fn scan(
        &self,
        state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        limit: Option<usize>,
    ) -> DFResult<Arc<dyn ExecutionPlan>> {
        let mut batches = Vec::new();
        for meta in &self.files {
            let reader = ParquetObjectReader::new(self.store.clone(), meta.clone());
            let builder = ParquetRecordBatchStreamBuilder::new(reader)
                .await
                .map_err(|e| DataFusionError::External(Box::new(e)))?;
            let mut stream = builder
                .build()
                .map_err(|e| DataFusionError::External(Box::new(e)))?;
            while let Some(batch) = stream
                .try_next()
                .await
                .map_err(|e| DataFusionError::External(Box::new(e)))?
            {
                batches.push(self.attach_extra_column(batch, meta)?);
            }
        }
        if batches.is_empty() {
            batches.push(RecordBatch::new_empty(self.schema.clone()));
        }
        let mem_table = MemTable::try_new(self.schema.clone(), vec![batches])?;
        mem_table.scan(state, projection, filters, limit).await
    }
}
