//! Wire-level data model shared by the coordinator and the workers it dispatches to.

use serde::{Deserialize, Serialize};

/// One client-submitted SQL statement plus execution knobs.
///
/// Immutable for the lifetime of a request: constructed once from the inbound
/// JSON body and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub profiling: bool,
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    #[serde(default = "NumThreads::default")]
    pub num_threads: NumThreads,
    #[serde(default)]
    pub lb_url: Option<String>,
    #[serde(default)]
    pub force_refresh_cache: bool,
}

fn default_max_rows() -> u64 {
    50
}

/// `num_threads` is either a concrete count or the `"auto"` sentinel: the
/// request body accepts either an integer or the literal string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumThreads {
    Auto(AutoMarker),
    Count(u32),
}

/// Zero-sized marker so `NumThreads::Auto` serializes as the literal string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoMarker;

impl Serialize for AutoMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("auto")
    }
}

impl<'de> Deserialize<'de> for AutoMarker {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.eq_ignore_ascii_case("auto") {
            Ok(AutoMarker)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected \"auto\", got {s:?}"
            )))
        }
    }
}

impl Default for NumThreads {
    fn default() -> Self {
        NumThreads::Auto(AutoMarker)
    }
}

/// A single result cell: null, a signed integer, a finite float, a bool, or
/// a string. Serializes untagged so the wire shape is the bare JSON
/// primitive — no `{"type": ..., "value": ...}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl CellValue {
    pub fn null() -> Self {
        CellValue::Null
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// A single row, in column order.
pub type Row = Vec<CellValue>;

/// The result of executing one SQL statement against the embedded engine, or
/// against a worker backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub hostname: String,
    pub execution_time: f64,
}

/// The merged response for `/distributed-query`: a `ResultSet` plus the
/// number of partitions that contributed to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub hostname: String,
    pub execution_time: f64,
    pub partitions_used: usize,
}

/// Returned instead of `ResultSet` when `profiling: true` was requested and
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingResultSet {
    pub profiling: serde_json::Value,
    pub hostname: String,
    pub execution_time: f64,
}
