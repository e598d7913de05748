//! The rule-expression language: a small arithmetic/boolean grammar over
//! ticker references (`#MXNL:RIZ3.long[2H]:-1.mean()`), compiled to a tree
//! the evaluator walks against the store-keeper.
//!
//! Pipeline: [`lexer::lex`] → [`parser::parse`] → [`rewrite::rewrite`] →
//! (trial) [`eval::evaluate`]. `compile` runs the first three stages and
//! returns a tree with no [`ast::Expr::TickerRef`] nodes left in it.

pub mod ast;
pub mod compiled;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod rewrite;

use error_stack::Report;

use crate::error::ExpressionError;
use crate::store_keeper::StoreKeeper;
use ast::Expr;
use eval::Value;

/// Lex, parse and rewrite `source` into an evaluable expression. Does not
/// touch the store-keeper; `WrongCondition`/`NonexistentAggregator` are the
/// only errors this can raise.
pub fn compile(source: &str) -> Result<Expr, Report<ExpressionError>> {
    let tokens = lexer::lex(source)?;
    let parsed = parser::parse(&tokens)?;
    let rewritten = rewrite::rewrite(parsed)?;
    debug_assert!(rewritten.is_fully_rewritten());
    Ok(rewritten)
}

/// Evaluate a compiled expression and require its top-level result to be
/// boolean. Used both for the condition processor's creation-time trial
/// run and for every scheduler tick.
pub async fn evaluate_as_bool(
    expr: &Expr,
    store_keeper: &StoreKeeper,
) -> Result<bool, Report<ExpressionError>> {
    match eval::evaluate(expr, store_keeper).await? {
        Value::Bool(b) => Ok(b),
        _ => Err(Report::new(ExpressionError::WrongCondition {
            reason: "expression does not evaluate to a boolean".into(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregator, CandleRow, TickerNaming, TimeSpan};
    use crate::storage::sqlite::SqliteStorage;
    use crate::storage::Storage;
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn compile_then_evaluate_end_to_end() {
        let naming = TickerNaming::new("YNDX", Aggregator::Moex, TimeSpan::Minute);
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await);
        storage
            .upsert_candles(
                &naming,
                &[CandleRow {
                    datetime: Utc::now().timestamp(),
                    mean_price: Some(2500.0),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        let keeper = StoreKeeper::new(storage, None);

        let expr = compile("#YNDX.mean[C]>2000").unwrap();
        assert!(evaluate_as_bool(&expr, &keeper).await.unwrap());
    }

    #[tokio::test]
    async fn non_boolean_top_level_is_wrong_condition() {
        let naming = TickerNaming::new("YNDX", Aggregator::Moex, TimeSpan::Minute);
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await);
        storage
            .upsert_candles(
                &naming,
                &[CandleRow {
                    datetime: Utc::now().timestamp(),
                    mean_price: Some(2500.0),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        let keeper = StoreKeeper::new(storage, None);

        let expr = compile("#YNDX.mean[C]").unwrap();
        let err = evaluate_as_bool(&expr, &keeper).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExpressionError::WrongCondition { .. }
        ));
    }

    #[test]
    fn compile_rejects_unknown_aggregator() {
        let err = compile("#FOO:BAR.mean[C]>1").unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExpressionError::NonexistentAggregator { short } if short == "foo"
        ));
    }
}
