//! Serialization of a rewritten [`Expr`] to the text form persisted as
//! `compiled_condition`, and back.
//!
//! This is a closed prefix-call grammar over exactly the node kinds
//! [`Expr`] has — `fetch`/`reduce` plus one call per arithmetic,
//! comparison and logical operator — so there is nothing to parse here
//! beyond what the allow-list already permits. It is re-parsed once, at
//! `ConditionProcessor::bootstrap`/every `tick`, and never derived from
//! the user's raw surface text: the persisted form has to stay evaluable
//! on its own even if the surface grammar (`expr::lexer`/`expr::parser`)
//! changes later.
use error_stack::Report;

use crate::error::ExpressionError;
use crate::expr::ast::{ArithOp, CompareOp, Expr, FetchSpec, LogicalOp, ReduceFn, UnaryOp};
use crate::model::{Aggregator, Column, TickerNaming, TimeSpan};

/// Render a fully rewritten expression to its persisted text form.
pub fn render(expr: &Expr) -> String {
    match expr {
        Expr::Literal(value) => format!("{value}"),
        Expr::TickerRef(_) => {
            unreachable!("compiled::render is only called on a fully rewritten expression")
        }
        Expr::Fetch(spec) => render_fetch(spec),
        Expr::Reduce(func, inner) => format!("reduce({},{})", reduce_name(*func), render(inner)),
        Expr::UnaryOp(UnaryOp::Neg, inner) => format!("neg({})", render(inner)),
        Expr::UnaryOp(UnaryOp::Not, inner) => format!("not({})", render(inner)),
        Expr::BinOp(op, lhs, rhs) => format!("{}({},{})", arith_name(*op), render(lhs), render(rhs)),
        Expr::Compare(op, lhs, rhs) => {
            format!("{}({},{})", compare_name(*op), render(lhs), render(rhs))
        }
        Expr::Logical(op, lhs, rhs) => {
            format!("{}({},{})", logical_name(*op), render(lhs), render(rhs))
        }
    }
}

fn render_fetch(spec: &FetchSpec) -> String {
    format!(
        "fetch({},{},{},{},{},{})",
        spec.naming.aggregator.short_code(),
        spec.naming.symbol,
        spec.naming.timespan.db_interval(),
        spec.column.code(),
        spec.start_bar,
        spec.end_bar,
    )
}

fn reduce_name(func: ReduceFn) -> &'static str {
    match func {
        ReduceFn::Mean => "mean",
        ReduceFn::Min => "min",
        ReduceFn::Max => "max",
        ReduceFn::Sum => "sum",
        ReduceFn::Last => "last",
    }
}

fn reduce_from_name(name: &str) -> Option<ReduceFn> {
    match name {
        "mean" => Some(ReduceFn::Mean),
        "min" => Some(ReduceFn::Min),
        "max" => Some(ReduceFn::Max),
        "sum" => Some(ReduceFn::Sum),
        "last" => Some(ReduceFn::Last),
        _ => None,
    }
}

fn arith_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Div => "div",
        ArithOp::Mod => "mod",
    }
}

fn arith_from_name(name: &str) -> Option<ArithOp> {
    match name {
        "add" => Some(ArithOp::Add),
        "sub" => Some(ArithOp::Sub),
        "mul" => Some(ArithOp::Mul),
        "div" => Some(ArithOp::Div),
        "mod" => Some(ArithOp::Mod),
        _ => None,
    }
}

fn compare_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Lt => "lt",
        CompareOp::Le => "le",
        CompareOp::Gt => "gt",
        CompareOp::Ge => "ge",
        CompareOp::Eq => "eq",
        CompareOp::Ne => "ne",
    }
}

fn compare_from_name(name: &str) -> Option<CompareOp> {
    match name {
        "lt" => Some(CompareOp::Lt),
        "le" => Some(CompareOp::Le),
        "gt" => Some(CompareOp::Gt),
        "ge" => Some(CompareOp::Ge),
        "eq" => Some(CompareOp::Eq),
        "ne" => Some(CompareOp::Ne),
        _ => None,
    }
}

fn logical_name(op: LogicalOp) -> &'static str {
    match op {
        LogicalOp::And => "and",
        LogicalOp::Or => "or",
    }
}

fn logical_from_name(name: &str) -> Option<LogicalOp> {
    match name {
        "and" => Some(LogicalOp::And),
        "or" => Some(LogicalOp::Or),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Tok>, Report<ExpressionError>> {
    let chars: Vec<char> = source.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '-' if chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                toks.push(Tok::Number(parse_number(&chars[start..i])?));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                toks.push(Tok::Number(parse_number(&chars[start..i])?));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(malformed(format!("unexpected character '{other}'"))),
        }
    }

    Ok(toks)
}

fn parse_number(chars: &[char]) -> Result<f64, Report<ExpressionError>> {
    let text: String = chars.iter().collect();
    text.parse::<f64>()
        .map_err(|_| malformed(format!("bad number '{text}'")))
}

/// Parse text previously produced by [`render`] back into an expression.
pub fn parse(source: &str) -> Result<Expr, Report<ExpressionError>> {
    let toks = tokenize(source)?;
    let mut parser = Parser { toks: &toks, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.toks.len() {
        return Err(malformed("trailing tokens after a complete compiled condition"));
    }
    Ok(expr)
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Tok) -> Result<(), Report<ExpressionError>> {
        match self.advance() {
            Some(tok) if &tok == expected => Ok(()),
            Some(tok) => Err(malformed(format!("expected {expected:?}, found {tok:?}"))),
            None => Err(malformed(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn eat_ident(&mut self) -> Result<String, Report<ExpressionError>> {
        match self.advance() {
            Some(Tok::Ident(name)) => Ok(name),
            Some(tok) => Err(malformed(format!("expected an identifier, found {tok:?}"))),
            None => Err(malformed("expected an identifier, found end of input")),
        }
    }

    fn eat_integer(&mut self) -> Result<i64, Report<ExpressionError>> {
        match self.advance() {
            Some(Tok::Number(n)) if n.fract() == 0.0 => Ok(n as i64),
            Some(tok) => Err(malformed(format!("expected an integer, found {tok:?}"))),
            None => Err(malformed("expected an integer, found end of input")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, Report<ExpressionError>> {
        match self.advance() {
            Some(Tok::Number(value)) => Ok(Expr::Literal(value)),
            Some(Tok::Ident(name)) => self.parse_call(&name),
            Some(other) => Err(malformed(format!("unexpected token {other:?}"))),
            None => Err(malformed("unexpected end of input")),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, Report<ExpressionError>> {
        self.eat(&Tok::LParen)?;
        match name {
            "fetch" => self.parse_fetch(),
            "reduce" => {
                let func_name = self.eat_ident()?;
                let func = reduce_from_name(&func_name)
                    .ok_or_else(|| malformed(format!("unknown reduction '{func_name}'")))?;
                self.eat(&Tok::Comma)?;
                let inner = self.parse_expr()?;
                self.eat(&Tok::RParen)?;
                Ok(Expr::Reduce(func, Box::new(inner)))
            }
            "neg" => {
                let inner = self.parse_expr()?;
                self.eat(&Tok::RParen)?;
                Ok(Expr::UnaryOp(UnaryOp::Neg, Box::new(inner)))
            }
            "not" => {
                let inner = self.parse_expr()?;
                self.eat(&Tok::RParen)?;
                Ok(Expr::UnaryOp(UnaryOp::Not, Box::new(inner)))
            }
            _ if arith_from_name(name).is_some() => {
                let op = arith_from_name(name).expect("checked above");
                let (lhs, rhs) = self.parse_pair()?;
                Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
            }
            _ if compare_from_name(name).is_some() => {
                let op = compare_from_name(name).expect("checked above");
                let (lhs, rhs) = self.parse_pair()?;
                Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
            }
            _ if logical_from_name(name).is_some() => {
                let op = logical_from_name(name).expect("checked above");
                let (lhs, rhs) = self.parse_pair()?;
                Ok(Expr::Logical(op, Box::new(lhs), Box::new(rhs)))
            }
            other => Err(malformed(format!("unknown compiled-form identifier '{other}'"))),
        }
    }

    fn parse_pair(&mut self) -> Result<(Expr, Expr), Report<ExpressionError>> {
        let lhs = self.parse_expr()?;
        self.eat(&Tok::Comma)?;
        let rhs = self.parse_expr()?;
        self.eat(&Tok::RParen)?;
        Ok((lhs, rhs))
    }

    fn parse_fetch(&mut self) -> Result<Expr, Report<ExpressionError>> {
        let agg_code = self.eat_ident()?;
        self.eat(&Tok::Comma)?;
        let symbol = self.eat_ident()?;
        self.eat(&Tok::Comma)?;
        let timespan_code = self.eat_ident()?;
        self.eat(&Tok::Comma)?;
        let column_code = self.eat_ident()?;
        self.eat(&Tok::Comma)?;
        let start_bar = self.eat_integer()?;
        self.eat(&Tok::Comma)?;
        let end_bar = self.eat_integer()?;
        self.eat(&Tok::RParen)?;

        let aggregator = Aggregator::from_short(&agg_code)
            .ok_or_else(|| malformed(format!("unknown aggregator code '{agg_code}'")))?;

        let mut letter_chars = timespan_code.chars();
        let letter = match (letter_chars.next(), letter_chars.next()) {
            (Some(c), None) => c,
            _ => return Err(malformed(format!("invalid timespan code '{timespan_code}'"))),
        };
        let timespan = TimeSpan::from_letter(letter)
            .ok_or_else(|| malformed(format!("unknown timespan letter '{letter}'")))?;

        let column = Column::from_code(&column_code)
            .ok_or_else(|| malformed(format!("unknown column code '{column_code}'")))?;

        Ok(Expr::Fetch(Box::new(FetchSpec {
            naming: TickerNaming::new(symbol, aggregator, timespan),
            column,
            start_bar,
            end_bar,
        })))
    }
}

fn malformed(reason: impl Into<String>) -> Report<ExpressionError> {
    Report::new(ExpressionError::WrongCondition {
        reason: format!("malformed compiled condition: {}", reason.into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{lexer::lex, parser::parse as parse_surface, rewrite::rewrite};

    fn compiled_for(source: &str) -> Expr {
        let tokens = lex(source).unwrap();
        let parsed = parse_surface(&tokens).unwrap();
        rewrite(parsed).unwrap()
    }

    #[test]
    fn render_then_parse_round_trips_a_simple_comparison() {
        let expr = compiled_for("#YNDX.mean[C]>2000");
        let text = render(&expr);
        assert_eq!(text, "gt(reduce(last,fetch(moex,YNDX,T,mean,-1,0)),2000)");
        let parsed_back = parse(&text).unwrap();
        assert_eq!(parsed_back, expr);
    }

    #[test]
    fn render_then_parse_round_trips_aggregator_and_reduction() {
        let expr = compiled_for("#MXNL:RIZ3.long[2H]:-1.mean() > 0");
        let text = render(&expr);
        let parsed_back = parse(&text).unwrap();
        assert_eq!(parsed_back, expr);
    }

    #[test]
    fn render_then_parse_round_trips_logical_composition() {
        let expr = compiled_for("#YNDX.mean[C]>1 and #YNDX.vol[2D]<5");
        let text = render(&expr);
        let parsed_back = parse(&text).unwrap();
        assert_eq!(parsed_back, expr);
    }

    #[test]
    fn parse_rejects_unknown_identifier() {
        let err = parse("bogus(1,2)").unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExpressionError::WrongCondition { .. }
        ));
    }

    #[test]
    fn parse_rejects_unknown_aggregator_code() {
        let err = parse("fetch(zzzz,YNDX,T,mean,-1,0)").unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExpressionError::WrongCondition { .. }
        ));
    }
}
