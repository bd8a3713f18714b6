//! Predicate Injector: rewrites a SELECT to add `partition_column = value`
//! to its WHERE clause without altering semantics, operating on the
//! `sqlparser` AST rather than text.

use sqlparser::ast::{BinaryOperator, Expr, Ident, Query, Select, SetExpr, TableFactor, Value};

use crate::error::CoordinatorError;
use crate::sql_ast::{parse_single_statement, references_parquet_read};

/// Rewrites every SELECT whose FROM references the parquet-read table
/// function — including nested sub-selects — to additionally require
/// `col = value`. SELECTs with a different FROM are left untouched.
///
/// The value is always bound as a quoted string literal; if the partition
/// column's real type is numeric, the embedded engine's implicit cast rules
/// apply at execution time. Quoting through `sqlparser`'s own
/// `Value::SingleQuotedString` serializer means the literal can never break
/// out of the predicate context.
pub fn rewrite(sql: &str, column: &str, value: &str) -> Result<String, CoordinatorError> {
    let mut statement = parse_single_statement(sql)?;
    match &mut statement {
        sqlparser::ast::Statement::Query(query) => inject_into_query(query, column, value),
        _ => {
            return Err(CoordinatorError::MalformedQuery(
                "statement is not a SELECT query".to_string(),
            ));
        }
    }
    Ok(statement.to_string())
}

fn inject_into_query(query: &mut Query, column: &str, value: &str) {
    inject_into_set_expr(&mut query.body, column, value);
}

fn inject_into_set_expr(set_expr: &mut SetExpr, column: &str, value: &str) {
    match set_expr {
        SetExpr::Select(select) => inject_into_select(select, column, value),
        SetExpr::SetOperation { left, right, .. } => {
            inject_into_set_expr(left, column, value);
            inject_into_set_expr(right, column, value);
        }
        SetExpr::Query(query) => inject_into_query(query, column, value),
        _ => {}
    }
}

fn inject_into_select(select: &mut Select, column: &str, value: &str) {
    let this_select_reads_parquet = select.from.iter().any(|twj| {
        references_parquet_read(&twj.relation)
            || twj.joins.iter().any(|j| references_parquet_read(&j.relation))
    });
    if this_select_reads_parquet {
        inject_predicate(&mut select.selection, column, value);
    }
    for table_with_joins in &mut select.from {
        recurse_table_factor(&mut table_with_joins.relation, column, value);
        for join in &mut table_with_joins.joins {
            recurse_table_factor(&mut join.relation, column, value);
        }
    }
}

fn recurse_table_factor(factor: &mut TableFactor, column: &str, value: &str) {
    match factor {
        TableFactor::Derived { subquery, .. } => inject_into_query(subquery, column, value),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            recurse_table_factor(&mut table_with_joins.relation, column, value);
            for join in &mut table_with_joins.joins {
                recurse_table_factor(&mut join.relation, column, value);
            }
        }
        _ => {}
    }
}

fn inject_predicate(selection: &mut Option<Expr>, column: &str, value: &str) {
    let predicate = Expr::BinaryOp {
        left: Box::new(Expr::Identifier(Ident::new(column))),
        op: BinaryOperator::Eq,
        right: Box::new(Expr::Value(Value::SingleQuotedString(value.to_string()))),
    };
    let combined = match selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(predicate),
            op: BinaryOperator::And,
            right: Box::new(existing),
        },
        None => predicate,
    };
    *selection = Some(combined);
}
