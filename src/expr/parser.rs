use error_stack::Report;

use crate::error::ExpressionError;
use crate::expr::ast::{ArithOp, CompareOp, Expr, LogicalOp, ReduceFn, TickerRef, UnaryOp};
use crate::expr::lexer::Token;
use crate::model::Column;

/// Recursive-descent parser over the token stream produced by
/// [`crate::expr::lexer::lex`]. Operator precedence, loosest to tightest:
/// `or`, `and`, `not`, comparisons, `+ -`, `* / %`, unary minus.
pub fn parse(tokens: &[Token]) -> Result<Expr, Report<ExpressionError>> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.logical_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(wrong_condition("trailing tokens after a complete expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> Result<(), Report<ExpressionError>> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(wrong_condition(format!("expected {expected:?}, found {tok:?}"))),
            None => Err(wrong_condition(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn eat_ident(&mut self) -> Result<String, Report<ExpressionError>> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            Some(tok) => Err(wrong_condition(format!("expected an identifier, found {tok:?}"))),
            None => Err(wrong_condition("expected an identifier, found end of input")),
        }
    }

    fn logical_or(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let mut lhs = self.logical_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.logical_and()?;
            lhs = Expr::Logical(LogicalOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let mut lhs = self.unary_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.unary_not()?;
            lhs = Expr::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary_not(&mut self) -> Result<Expr, Report<ExpressionError>> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.unary_not()?;
            return Ok(Expr::UnaryOp(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            Some(Token::EqEq) => Some(CompareOp::Eq),
            Some(Token::NotEq) => Some(CompareOp::Ne),
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };
        self.advance();
        let rhs = self.additive()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, Report<ExpressionError>> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            let inner = self.unary()?;
            return Ok(Expr::UnaryOp(UnaryOp::Neg, Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, Report<ExpressionError>> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Literal(*value)),
            Some(Token::LParen) => {
                let inner = self.logical_or()?;
                self.eat(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Hash) => self.ticker_ref(),
            Some(tok) => Err(wrong_condition(format!("unexpected token {tok:?}"))),
            None => Err(wrong_condition("unexpected end of input")),
        }
    }

    fn ticker_ref(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let first = self.eat_ident()?;
        let (aggregator_short, symbol) = if matches!(self.peek(), Some(Token::Colon)) {
            self.advance();
            let symbol = self.eat_ident()?;
            (Some(first), symbol)
        } else {
            (None, first)
        };

        self.eat(&Token::Dot)?;
        let column_code = self.eat_ident()?;
        let column = Column::from_code(&column_code)
            .ok_or_else(|| wrong_condition(format!("unknown column code '{column_code}'")))?;

        self.eat(&Token::LBracket)?;
        let count = match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.advance();
                if n.fract() != 0.0 || n <= 0.0 {
                    return Err(wrong_condition("interval count must be a positive integer"));
                }
                n as i64
            }
            _ => 1,
        };
        let letter_name = self.eat_ident()?;
        let mut letter_chars = letter_name.chars();
        let letter = match (letter_chars.next(), letter_chars.next()) {
            (Some(c), None) => c.to_ascii_uppercase(),
            _ => {
                return Err(wrong_condition(format!(
                    "interval letter must be a single character, found '{letter_name}'"
                )))
            }
        };
        self.eat(&Token::RBracket)?;

        let rewind = if matches!(self.peek(), Some(Token::Colon)) {
            self.advance();
            self.eat(&Token::Minus)?;
            match self.advance() {
                Some(Token::Number(n)) if n.fract() == 0.0 && *n > 0.0 => -(*n as i64),
                _ => {
                    return Err(wrong_condition(
                        "rewind must be a negative integer when present",
                    ))
                }
            }
        } else {
            0
        };

        let func = if matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            let func_name = self.eat_ident()?;
            self.eat(&Token::LParen)?;
            self.eat(&Token::RParen)?;
            Some(
                ReduceFn::from_name(&func_name)
                    .ok_or_else(|| wrong_condition(format!("unknown reduction '{func_name}'")))?,
            )
        } else {
            None
        };

        Ok(Expr::TickerRef(TickerRef {
            aggregator_short,
            symbol,
            column,
            count,
            letter,
            rewind,
            func,
        }))
    }
}

fn wrong_condition(reason: impl Into<String>) -> Report<ExpressionError> {
    Report::new(ExpressionError::WrongCondition {
        reason: reason.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lexer::lex;

    fn parse_str(source: &str) -> Expr {
        parse(&lex(source).unwrap()).unwrap()
    }

    #[test]
    fn parses_simple_comparison() {
        let expr = parse_str("#YNDX.mean[C]>2000");
        match expr {
            Expr::Compare(CompareOp::Gt, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::TickerRef(_)));
                assert!(matches!(*rhs, Expr::Literal(v) if v == 2000.0));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parses_ticker_ref_with_aggregator_rewind_and_func() {
        let expr = parse_str("#MXNL:RIZ3.long[2H]:-1.mean() > 0");
        let Expr::Compare(_, lhs, _) = expr else {
            panic!("expected comparison");
        };
        let Expr::TickerRef(reference) = *lhs else {
            panic!("expected ticker ref");
        };
        assert_eq!(reference.aggregator_short.as_deref(), Some("MXNL"));
        assert_eq!(reference.symbol, "RIZ3");
        assert_eq!(reference.column, Column::Long);
        assert_eq!(reference.count, 2);
        assert_eq!(reference.letter, 'H');
        assert_eq!(reference.rewind, -1);
        assert_eq!(reference.func, Some(ReduceFn::Mean));
    }

    #[test]
    fn rejects_explicit_zero_rewind() {
        let tokens = lex("#YNDX.mean[C]:0>1").unwrap();
        assert!(parse(&tokens).is_err());
    }

    #[test]
    fn rejects_disallowed_call_shape() {
        let tokens = lex("#YNDX.mean[C]+__import__(os)>0").unwrap();
        assert!(parse(&tokens).is_err());
    }

    #[test]
    fn parses_logical_composition() {
        let expr = parse_str("#YNDX.mean[C]>1 and not #YNDX.vol[C]<5 or 1==1");
        assert!(matches!(expr, Expr::Logical(LogicalOp::Or, _, _)));
    }
}
