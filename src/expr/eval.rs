use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;

use crate::error::ExpressionError;
use crate::expr::ast::{ArithOp, CompareOp, Expr, LogicalOp, ReduceFn, UnaryOp};
use crate::store_keeper::StoreKeeper;

/// Runtime value produced while walking a rewritten expression. `Series`
/// only ever appears as the immediate result of an [`Expr::Fetch`]; every
/// other node either consumes or produces `Number`/`Bool`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Series(Vec<f64>),
}

/// Walk a fully rewritten expression bottom-up, delegating every
/// [`Expr::Fetch`] to the store-keeper. The caller is responsible for
/// rejecting a non-boolean top-level result (see `expr::compile`'s trial
/// evaluation).
pub fn evaluate<'a>(
    expr: &'a Expr,
    store_keeper: &'a StoreKeeper,
) -> BoxFuture<'a, Result<Value, Report<ExpressionError>>> {
    Box::pin(async move {
        match expr {
            Expr::Literal(value) => Ok(Value::Number(*value)),
            Expr::TickerRef(_) => Err(wrong_condition(
                "ticker reference reached evaluation unrewritten",
            )),
            Expr::Fetch(spec) => {
                let rows = store_keeper
                    .get_ticker(&spec.naming, spec.start_bar, spec.end_bar)
                    .await
                    .change_context(ExpressionError::WrongCondition {
                        reason: "failed to fetch ticker data".into(),
                    })?;

                let wanted = (spec.end_bar - spec.start_bar).max(0) as usize;
                let mut values: Vec<f64> =
                    rows.iter().filter_map(|row| row.get(spec.column)).collect();
                if values.len() > wanted {
                    values = values.split_off(values.len() - wanted);
                }
                Ok(Value::Series(values))
            }
            Expr::Reduce(func, inner) => {
                let series = as_series(evaluate(inner, store_keeper).await?)?;
                reduce_series(*func, &series)
            }
            Expr::UnaryOp(UnaryOp::Neg, inner) => {
                let value = as_number(evaluate(inner, store_keeper).await?)?;
                Ok(Value::Number(-value))
            }
            Expr::UnaryOp(UnaryOp::Not, inner) => {
                let value = as_bool(evaluate(inner, store_keeper).await?)?;
                Ok(Value::Bool(!value))
            }
            Expr::BinOp(op, lhs, rhs) => {
                let lhs = as_number(evaluate(lhs, store_keeper).await?)?;
                let rhs = as_number(evaluate(rhs, store_keeper).await?)?;
                Ok(Value::Number(apply_arith(*op, lhs, rhs)))
            }
            Expr::Compare(op, lhs, rhs) => {
                let lhs = as_number(evaluate(lhs, store_keeper).await?)?;
                let rhs = as_number(evaluate(rhs, store_keeper).await?)?;
                Ok(Value::Bool(apply_compare(*op, lhs, rhs)))
            }
            Expr::Logical(op, lhs, rhs) => {
                let lhs = as_bool(evaluate(lhs, store_keeper).await?)?;
                let rhs = as_bool(evaluate(rhs, store_keeper).await?)?;
                Ok(Value::Bool(match op {
                    LogicalOp::And => lhs && rhs,
                    LogicalOp::Or => lhs || rhs,
                }))
            }
        }
    })
}

fn reduce_series(func: ReduceFn, values: &[f64]) -> Result<Value, Report<ExpressionError>> {
    if values.is_empty() {
        return Err(wrong_condition("no data available in the requested window"));
    }
    let result = match func {
        ReduceFn::Mean => values.iter().sum::<f64>() / values.len() as f64,
        ReduceFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        ReduceFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ReduceFn::Sum => values.iter().sum(),
        ReduceFn::Last => *values.last().expect("checked non-empty above"),
    };
    Ok(Value::Number(result))
}

fn apply_arith(op: ArithOp, lhs: f64, rhs: f64) -> f64 {
    match op {
        ArithOp::Add => lhs + rhs,
        ArithOp::Sub => lhs - rhs,
        ArithOp::Mul => lhs * rhs,
        ArithOp::Div => lhs / rhs,
        ArithOp::Mod => lhs % rhs,
    }
}

fn apply_compare(op: CompareOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CompareOp::Lt => lhs < rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
    }
}

fn as_number(value: Value) -> Result<f64, Report<ExpressionError>> {
    match value {
        Value::Number(n) => Ok(n),
        _ => Err(wrong_condition("expected a number in this position")),
    }
}

fn as_bool(value: Value) -> Result<bool, Report<ExpressionError>> {
    match value {
        Value::Bool(b) => Ok(b),
        _ => Err(wrong_condition("expected a boolean in this position")),
    }
}

fn as_series(value: Value) -> Result<Vec<f64>, Report<ExpressionError>> {
    match value {
        Value::Series(s) => Ok(s),
        _ => Err(wrong_condition("expected a fetched series in this position")),
    }
}

fn wrong_condition(reason: impl Into<String>) -> Report<ExpressionError> {
    Report::new(ExpressionError::WrongCondition {
        reason: reason.into(),
    })
}
