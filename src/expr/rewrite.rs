use error_stack::Report;

use crate::error::ExpressionError;
use crate::expr::ast::{Expr, FetchSpec, ReduceFn, TickerRef};
use crate::model::{Aggregator, TickerNaming, TimeSpan};

/// Replace every [`Expr::TickerRef`] node with a `fetch(naming, start,
/// end).reduce(func)` pair: `start = rewind - count`, `end = rewind`, and
/// `reduce` is the named aggregate or `ReduceFn::Last` when `func` is
/// absent. The outer infix shape is untouched.
pub fn rewrite(expr: Expr) -> Result<Expr, Report<ExpressionError>> {
    match expr {
        Expr::Literal(_) | Expr::Fetch(_) => Ok(expr),
        Expr::TickerRef(reference) => rewrite_ticker_ref(reference),
        Expr::Reduce(func, inner) => Ok(Expr::Reduce(func, Box::new(rewrite(*inner)?))),
        Expr::UnaryOp(op, inner) => Ok(Expr::UnaryOp(op, Box::new(rewrite(*inner)?))),
        Expr::BinOp(op, lhs, rhs) => {
            Ok(Expr::BinOp(op, Box::new(rewrite(*lhs)?), Box::new(rewrite(*rhs)?)))
        }
        Expr::Compare(op, lhs, rhs) => {
            Ok(Expr::Compare(op, Box::new(rewrite(*lhs)?), Box::new(rewrite(*rhs)?)))
        }
        Expr::Logical(op, lhs, rhs) => {
            Ok(Expr::Logical(op, Box::new(rewrite(*lhs)?), Box::new(rewrite(*rhs)?)))
        }
    }
}

fn rewrite_ticker_ref(reference: TickerRef) -> Result<Expr, Report<ExpressionError>> {
    let aggregator = match &reference.aggregator_short {
        Some(short) => Aggregator::from_short(short).ok_or_else(|| {
            Report::new(ExpressionError::NonexistentAggregator {
                short: short.to_ascii_lowercase(),
            })
        })?,
        None => Aggregator::Moex,
    };

    let timespan = TimeSpan::from_letter(reference.letter).ok_or_else(|| {
        Report::new(ExpressionError::WrongCondition {
            reason: format!("unknown interval letter '{}'", reference.letter),
        })
    })?;

    let naming = TickerNaming::new(reference.symbol.clone(), aggregator, timespan);
    let start_bar = reference.rewind - reference.count;
    let end_bar = reference.rewind;

    let fetch = Expr::Fetch(Box::new(FetchSpec {
        naming,
        column: reference.column,
        start_bar,
        end_bar,
    }));

    Ok(Expr::Reduce(reference.func.unwrap_or(ReduceFn::Last), Box::new(fetch)))
}
