//! Aggregate Merger: combines one row per partition into a single row, one
//! output column at a time, using the aggregate kind each column was
//! derived from at introspection time ([`crate::introspector::column_kinds`]).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{CellValue, Row};

/// The combine rule for one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    None,
}

impl AggKind {
    pub fn from_function_name(name: &str) -> AggKind {
        match name.to_uppercase().as_str() {
            "SUM" => AggKind::Sum,
            "COUNT" => AggKind::Count,
            "MIN" => AggKind::Min,
            "MAX" => AggKind::Max,
            "AVG" => AggKind::Avg,
            _ => AggKind::None,
        }
    }
}

/// One output column's merge metadata.
#[derive(Debug, Clone)]
pub struct ColumnAggregate {
    pub name: String,
    pub kind: AggKind,
    /// The aggregate function's first-argument text (e.g. `"x"`, `"*"`),
    /// empty for non-aggregate columns. Used to pair `AVG(x)` with
    /// co-located `SUM(x)`/`COUNT(x)` siblings.
    pub arg: String,
}

/// Result of merging: the single combined row, plus the names of any AVG
/// columns that had to fall back to an unweighted mean of partition averages
/// because no co-located SUM/COUNT sibling existed.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub row: Row,
    pub approximate_columns: Vec<String>,
}

/// Combines `results` (one row per partition, each ordered per `columns`)
/// into a single row.
pub fn merge(results: &[Row], columns: &[ColumnAggregate]) -> MergeOutcome {
    let sum_count_siblings = find_sum_count_siblings(columns);
    let mut row = Vec::with_capacity(columns.len());
    let mut approximate_columns = Vec::new();

    for (idx, col) in columns.iter().enumerate() {
        let values: Vec<&CellValue> = results.iter().filter_map(|r| r.get(idx)).collect();
        let merged = match col.kind {
            AggKind::Sum | AggKind::Count => merge_sum(&values),
            AggKind::Min => merge_extreme(&values, true),
            AggKind::Max => merge_extreme(&values, false),
            AggKind::Avg => {
                if let Some((sum_idx, count_idx)) = sum_count_siblings.get(&idx) {
                    let sums: Vec<&CellValue> =
                        results.iter().filter_map(|r| r.get(*sum_idx)).collect();
                    let counts: Vec<&CellValue> =
                        results.iter().filter_map(|r| r.get(*count_idx)).collect();
                    finalize_avg_from_sum_count(&sums, &counts)
                } else {
                    approximate_columns.push(col.name.clone());
                    merge_unweighted_avg(&values)
                }
            }
            AggKind::None => values
                .into_iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(CellValue::Null),
        };
        row.push(merged);
    }

    MergeOutcome {
        row,
        approximate_columns,
    }
}

/// Finds, for every `AVG` column, a `SUM`/`COUNT` pair sharing its argument
/// text — the decomposition needed for a correct (not just plausible)
/// merged average.
fn find_sum_count_siblings(columns: &[ColumnAggregate]) -> HashMap<usize, (usize, usize)> {
    let mut map = HashMap::new();
    for (idx, col) in columns.iter().enumerate() {
        if col.kind != AggKind::Avg {
            continue;
        }
        let sum_idx = columns
            .iter()
            .position(|c| c.kind == AggKind::Sum && c.arg == col.arg);
        let count_idx = columns
            .iter()
            .position(|c| c.kind == AggKind::Count && c.arg == col.arg);
        if let (Some(s), Some(c)) = (sum_idx, count_idx) {
            map.insert(idx, (s, c));
        }
    }
    map
}

/// SUM/COUNT identity is 0: nulls are skipped, and a column with no
/// non-null partition value returns 0, not null.
fn merge_sum(values: &[&CellValue]) -> CellValue {
    let mut total = 0.0_f64;
    let mut is_float = false;
    for v in values {
        match v {
            CellValue::Int(i) => total += *i as f64,
            CellValue::Float(f) => {
                total += f;
                is_float = true;
            }
            _ => {}
        }
    }
    if is_float {
        CellValue::Float(total)
    } else {
        CellValue::Int(total as i64)
    }
}

/// MIN/MAX identity is "no value yet": nulls are skipped, and a column with
/// no non-null partition value returns null rather than an actual
/// +/-infinity (which wouldn't be JSON-representable).
fn merge_extreme(values: &[&CellValue], want_min: bool) -> CellValue {
    let mut best: Option<&CellValue> = None;
    for v in values {
        if v.is_null() {
            continue;
        }
        best = Some(match best {
            None => v,
            Some(current) => {
                let better = if want_min {
                    compare_cell(v, current) == Ordering::Less
                } else {
                    compare_cell(v, current) == Ordering::Greater
                };
                if better {
                    v
                } else {
                    current
                }
            }
        });
    }
    best.cloned().unwrap_or(CellValue::Null)
}

fn compare_cell(a: &CellValue, b: &CellValue) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a, b) {
            (CellValue::Str(x), CellValue::Str(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn finalize_avg_from_sum_count(sums: &[&CellValue], counts: &[&CellValue]) -> CellValue {
    let sum = merge_sum(sums).as_f64().unwrap_or(0.0);
    let count = merge_sum(counts).as_f64().unwrap_or(0.0);
    if count > 0.0 {
        CellValue::Float(sum / count)
    } else {
        CellValue::Null
    }
}

/// Unweighted fallback used only when no SUM/COUNT sibling is available.
/// Not exact when partitions carry unequal row counts, so it's flagged via
/// [`MergeOutcome::approximate_columns`] rather than silently trusted.
fn merge_unweighted_avg(values: &[&CellValue]) -> CellValue {
    let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if nums.is_empty() {
        CellValue::Null
    } else {
        CellValue::Float(nums.iter().sum::<f64>() / nums.len() as f64)
    }
}
