//! Shared `sqlparser` AST helpers used by both the introspector and the
//! predicate injector, so the two components agree on exactly what counts
//! as "the" parquet-read table function across the codebase.
//!
//! Structural parsing only — no regex, since a regex over raw SQL text
//! false-positives on string literals and can't see through nested
//! sub-selects.

use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::CoordinatorError;

/// The names the embedded engine recognizes as "read these parquet files".
/// Both spellings are accepted since DuckDB-flavored SQL uses either one.
pub const PARQUET_READ_FUNCTIONS: [&str; 2] = ["read_parquet", "parquet_read"];

pub fn is_parquet_read_function(name: &str) -> bool {
    PARQUET_READ_FUNCTIONS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(name))
}

/// Parse a single SQL statement. Fails with `MalformedQuery` on parse error
/// or when the input holds anything other than exactly one statement.
pub fn parse_single_statement(sql: &str) -> Result<Statement, CoordinatorError> {
    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| CoordinatorError::MalformedQuery(format!("SQL parse error: {e}")))?;
    if statements.len() != 1 {
        return Err(CoordinatorError::MalformedQuery(format!(
            "expected exactly one SQL statement, found {}",
            statements.len()
        )));
    }
    Ok(statements.remove(0))
}

/// The top-level `SELECT` of a statement, unwrapping a bare `Query`.
pub fn top_select(statement: &Statement) -> Result<&Select, CoordinatorError> {
    let Statement::Query(query) = statement else {
        return Err(CoordinatorError::MalformedQuery(
            "statement is not a SELECT query".to_string(),
        ));
    };
    top_select_of_query(query)
}

pub fn top_select_of_query(query: &Query) -> Result<&Select, CoordinatorError> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select),
        _ => Err(CoordinatorError::MalformedQuery(
            "query body is not a simple SELECT".to_string(),
        )),
    }
}

/// Returns the single `TableWithJoins` in `select.from`, rejecting multi-table
/// FROM clauses.
pub fn single_from(select: &Select) -> Result<&TableWithJoins, CoordinatorError> {
    match select.from.as_slice() {
        [one] if one.joins.is_empty() => Ok(one),
        [] => Err(CoordinatorError::MalformedQuery(
            "query has no FROM clause".to_string(),
        )),
        _ => Err(CoordinatorError::MalformedQuery(
            "query has more than one FROM source".to_string(),
        )),
    }
}

/// If `relation` is a call to the parquet-read table function, returns its
/// first positional string-literal argument (the dataset reference).
pub fn parquet_read_dataset_ref(relation: &TableFactor) -> Result<String, CoordinatorError> {
    let TableFactor::Table { name, args, .. } = relation else {
        return Err(CoordinatorError::MalformedQuery(
            "FROM source is not a function call".to_string(),
        ));
    };
    let fn_name = name
        .0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default();
    if !is_parquet_read_function(&fn_name) {
        return Err(CoordinatorError::MalformedQuery(format!(
            "FROM source '{fn_name}' is not a parquet-read table function"
        )));
    }
    let Some(table_args) = args else {
        return Err(CoordinatorError::MalformedQuery(
            "parquet-read table function called with no arguments".to_string(),
        ));
    };
    let first_arg = table_args
        .first()
        .ok_or_else(|| CoordinatorError::MalformedQuery("no arguments given".to_string()))?;
    string_literal_of_function_arg(first_arg).ok_or_else(|| {
        CoordinatorError::MalformedQuery(
            "parquet-read table function's first argument is not a string literal".to_string(),
        )
    })
}

fn string_literal_of_function_arg(arg: &FunctionArg) -> Option<String> {
    let expr = match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => expr,
        FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => expr,
        _ => return None,
    };
    string_literal(expr)
}

/// Renders a function argument's expression back to normalized text (e.g.
/// `"x"`, `"*"`), used to match `AVG(x)` against co-located `SUM(x)` /
/// `COUNT(x)` sibling columns by their shared argument (see `crate::merge`).
pub fn function_arg_text(arg: &FunctionArg) -> String {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => e.to_string(),
        FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => "*".to_string(),
        FunctionArg::Named {
            arg: FunctionArgExpr::Expr(e),
            ..
        } => e.to_string(),
        FunctionArg::Named {
            arg: FunctionArgExpr::Wildcard,
            ..
        } => "*".to_string(),
        _ => String::new(),
    }
}

pub fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
        Expr::Value(Value::DoubleQuotedString(s)) => Some(s.clone()),
        _ => None,
    }
}

/// True when `relation` calls the parquet-read table function (regardless of
/// whether its argument happens to be a literal) — used by the rewriter to
/// decide which FROM clauses get a predicate injected.
pub fn references_parquet_read(relation: &TableFactor) -> bool {
    matches!(relation, TableFactor::Table { name, .. }
        if name.0.last().is_some_and(|i| is_parquet_read_function(&i.value)))
}

/// Recursively collects every `Function` call node appearing in a SELECT's
/// projection and HAVING clause — the set of places an aggregate can
/// syntactically appear for the simple single-table queries this coordinator
/// distributes. Does not descend into nested sub-selects: a sub-select's
/// aggregates belong to that sub-select's own distributability, not to its
/// parent's.
pub fn collect_function_calls(select: &Select) -> Vec<&Function> {
    let mut out = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                collect_functions_in_expr(expr, &mut out);
            }
            _ => {}
        }
    }
    if let Some(having) = &select.having {
        collect_functions_in_expr(having, &mut out);
    }
    out
}

fn collect_functions_in_expr<'a>(expr: &'a Expr, out: &mut Vec<&'a Function>) {
    match expr {
        Expr::Function(f) => {
            out.push(f);
            for arg in &f.args {
                if let FunctionArg::Unnamed(FunctionArgExpr::Expr(inner))
                | FunctionArg::Named {
                    arg: FunctionArgExpr::Expr(inner),
                    ..
                } = arg
                {
                    collect_functions_in_expr(inner, out);
                }
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_functions_in_expr(left, out);
            collect_functions_in_expr(right, out);
        }
        Expr::UnaryOp { expr, .. } => collect_functions_in_expr(expr, out),
        Expr::Nested(inner) => collect_functions_in_expr(inner, out),
        Expr::Cast { expr, .. } => collect_functions_in_expr(expr, out),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                collect_functions_in_expr(operand, out);
            }
            for c in conditions {
                collect_functions_in_expr(c, out);
            }
            for r in results {
                collect_functions_in_expr(r, out);
            }
            if let Some(e) = else_result {
                collect_functions_in_expr(e, out);
            }
        }
        _ => {}
    }
}
