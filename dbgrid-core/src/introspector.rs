//! SQL Introspector: decides whether a query can be distributed across
//! partitions, and if so, which dataset it reads.
//!
//! A regex over raw SQL text would misclassify string literals that happen
//! to contain aggregate-looking substrings and cannot see through nested
//! sub-selects; this walks the `sqlparser` AST instead, via
//! [`crate::sql_ast`].

use std::collections::BTreeSet;

use sqlparser::ast::{Function, Select, SelectItem};

use crate::error::CoordinatorError;
use crate::merge::{AggKind, ColumnAggregate};
use crate::sql_ast::{self, parquet_read_dataset_ref};

/// The aggregate functions whose partial results can be combined across
/// partitions with a second pass of the same (or a related) aggregate.
const DISTRIBUTIVE_AGGREGATES: [&str; 5] = ["SUM", "COUNT", "AVG", "MIN", "MAX"];

/// Aggregate-shaped names this introspector recognizes but that cannot be
/// merged across partitions by any known combine rule — their presence still
/// marks the query non-distributable rather than being silently ignored.
const NON_DISTRIBUTIVE_AGGREGATES: [&str; 4] = ["MEDIAN", "STDDEV", "PERCENTILE_CONT", "MODE"];

/// Outcome of classifying one query: whether it's safe to distribute, the
/// aggregate functions it uses, and the dataset it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// True iff `aggregates` is non-empty and a subset of the distributive set.
    pub distributable: bool,
    /// Upper-cased names of every aggregate-shaped function found in the
    /// projection/HAVING (distributive or not — callers needing the reason a
    /// query was rejected inspect this set).
    pub aggregates: BTreeSet<String>,
    /// The dataset reference passed to the parquet-read table function —
    /// e.g. an S3 prefix or local glob — unchanged, for the partition
    /// discoverer to resolve.
    pub dataset_ref: String,
}

/// Classifies `sql`.
///
/// Fails with `MalformedQuery` only for structural problems: parse failure,
/// a missing/absent FROM, a FROM that isn't the expected parquet-read
/// function call, or a non-literal first argument. Whether the query's
/// aggregates are safe to distribute is reported in
/// `Classification::distributable`, not as an error — callers that need a
/// hard failure use [`ensure_distributable`].
pub fn classify(sql: &str) -> Result<Classification, CoordinatorError> {
    let statement = sql_ast::parse_single_statement(sql)?;
    let select = sql_ast::top_select(&statement)?;
    let from = sql_ast::single_from(select)?;
    let dataset_ref = parquet_read_dataset_ref(&from.relation)?;

    let functions = sql_ast::collect_function_calls(select);
    let mut aggregates = BTreeSet::new();
    for f in &functions {
        collect_aggregate_name(f, &mut aggregates);
    }

    let distributable = !aggregates.is_empty()
        && aggregates
            .iter()
            .all(|name| DISTRIBUTIVE_AGGREGATES.contains(&name.as_str()));

    Ok(Classification {
        distributable,
        aggregates,
        dataset_ref,
    })
}

/// Convenience wrapper for callers (the `/distributed-query` handler) that
/// need a hard error rather than a bool: turns a non-distributable
/// classification into `NonDistributiveAggregate`, naming the offending
/// aggregate(s) in the message.
pub fn ensure_distributable(classification: &Classification) -> Result<(), CoordinatorError> {
    if classification.distributable {
        return Ok(());
    }
    if classification.aggregates.is_empty() {
        return Err(CoordinatorError::NonDistributiveAggregate(
            "query has no aggregate to distribute".to_string(),
        ));
    }
    let offenders: Vec<&str> = classification
        .aggregates
        .iter()
        .map(String::as_str)
        .filter(|name| !DISTRIBUTIVE_AGGREGATES.contains(name))
        .collect();
    Err(CoordinatorError::NonDistributiveAggregate(format!(
        "non-distributable aggregate(s): {}",
        offenders.join(", ")
    )))
}

/// Derives one [`ColumnAggregate`] per projected output column, in
/// projection order, for [`crate::merge::merge`] to reduce worker responses
/// by. Reads each column's own projection expression rather than zipping an
/// unordered set of detected aggregate names against output columns
/// positionally, which would silently mispair `AVG`/`SUM`/`MIN` in any query
/// with more than one aggregate of different kinds.
pub fn column_kinds(sql: &str) -> Result<Vec<ColumnAggregate>, CoordinatorError> {
    let statement = sql_ast::parse_single_statement(sql)?;
    let select = sql_ast::top_select(&statement)?;
    Ok(projection_column_kinds(select))
}

fn projection_column_kinds(select: &Select) -> Vec<ColumnAggregate> {
    select
        .projection
        .iter()
        .map(|item| match item {
            SelectItem::ExprWithAlias { expr, alias } => {
                column_aggregate(alias.value.clone(), expr)
            }
            SelectItem::UnnamedExpr(expr) => column_aggregate(expr.to_string(), expr),
            _ => ColumnAggregate {
                name: item.to_string(),
                kind: AggKind::None,
                arg: String::new(),
            },
        })
        .collect()
}

fn column_aggregate(name: String, expr: &sqlparser::ast::Expr) -> ColumnAggregate {
    let sqlparser::ast::Expr::Function(f) = expr else {
        return ColumnAggregate {
            name,
            kind: AggKind::None,
            arg: String::new(),
        };
    };
    let fn_name = f.name.0.last().map(|i| i.value.clone()).unwrap_or_default();
    let arg = f
        .args
        .first()
        .map(sql_ast::function_arg_text)
        .unwrap_or_default();
    ColumnAggregate {
        name,
        kind: AggKind::from_function_name(&fn_name),
        arg,
    }
}

/// Records `f`'s name in `aggregates` when it is an aggregate-shaped call
/// this introspector recognizes (distributive or not). A `DISTINCT`
/// qualifier turns an otherwise-distributive aggregate non-distributive,
/// because the partition-local partial value (a count, a sum) can no longer
/// be recombined by the merger's arithmetic: `COUNT(DISTINCT x)` is rejected
/// even though bare `COUNT` is allowed.
fn collect_aggregate_name(f: &Function, aggregates: &mut BTreeSet<String>) {
    let name = f
        .name
        .0
        .last()
        .map(|ident| ident.value.to_uppercase())
        .unwrap_or_default();

    let is_known = DISTRIBUTIVE_AGGREGATES.contains(&name.as_str())
        || NON_DISTRIBUTIVE_AGGREGATES.contains(&name.as_str());
    if !is_known {
        return;
    }

    if f.distinct {
        aggregates.insert(format!("{name}(DISTINCT)"));
    } else {
        aggregates.insert(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_simple_sum() {
        let c = classify("SELECT SUM(amount) AS total FROM read_parquet('s3://b/t/**')").unwrap();
        assert_eq!(c.dataset_ref, "s3://b/t/**");
        assert!(c.distributable);
        assert_eq!(c.aggregates, BTreeSet::from(["SUM".to_string()]));
    }

    #[test]
    fn classifies_multiple_aggregates() {
        let c = classify(
            "SELECT SUM(x), COUNT(*), AVG(y), MIN(z), MAX(z) FROM parquet_read('s3://b/t/**')",
        )
        .unwrap();
        assert!(c.distributable);
        assert_eq!(c.aggregates.len(), 5);
    }

    #[test]
    fn rejects_count_distinct() {
        let c = classify("SELECT COUNT(DISTINCT user_id) FROM read_parquet('s3://b/t/**')")
            .unwrap();
        assert!(!c.distributable);
        assert!(ensure_distributable(&c).is_err());
    }

    #[test]
    fn rejects_median() {
        let c = classify("SELECT MEDIAN(latency) FROM read_parquet('s3://b/t/**')").unwrap();
        assert!(!c.distributable);
    }

    #[test]
    fn rejects_non_parquet_from() {
        let err = classify("SELECT SUM(x) FROM some_table").unwrap_err();
        assert!(matches!(err, CoordinatorError::MalformedQuery(_)));
    }

    #[test]
    fn bare_select_with_no_aggregates_is_not_distributable() {
        let c = classify("SELECT * FROM read_parquet('s3://b/t/**') WHERE x > 1").unwrap();
        assert!(c.aggregates.is_empty());
        assert!(!c.distributable);
    }

    #[test]
    fn column_kinds_pairs_avg_with_its_own_sum_count_siblings() {
        let kinds = column_kinds(
            "SELECT AVG(y) AS avg_y, SUM(y) AS sum_y, COUNT(y) AS count_y, MIN(z) AS min_z \
             FROM read_parquet('s3://b/t/**')",
        )
        .unwrap();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0].kind, AggKind::Avg);
        assert_eq!(kinds[0].arg, "y");
        assert_eq!(kinds[1].kind, AggKind::Sum);
        assert_eq!(kinds[2].kind, AggKind::Count);
        assert_eq!(kinds[3].kind, AggKind::Min);
        assert_eq!(kinds[3].name, "min_z");
    }

    #[test]
    fn column_kinds_is_order_independent() {
        // `SUM(x), MIN(x)` vs. `MIN(x), SUM(x)` must classify each output
        // column by its own projection, not by position against an
        // unordered aggregate set.
        let forward = column_kinds("SELECT SUM(x) AS s, MIN(x) AS m FROM read_parquet('p')").unwrap();
        let reversed = column_kinds("SELECT MIN(x) AS m, SUM(x) AS s FROM read_parquet('p')").unwrap();
        assert_eq!(forward[0].kind, AggKind::Sum);
        assert_eq!(forward[1].kind, AggKind::Min);
        assert_eq!(reversed[0].kind, AggKind::Min);
        assert_eq!(reversed[1].kind, AggKind::Sum);
    }
}
