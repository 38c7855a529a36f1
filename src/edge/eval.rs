//! Restricted boolean expression evaluator for `EdgeCondition::Conditional`.
//!
//! Accepts a syntactic subset of the usual boolean/comparison grammar:
//! `and`/`or`/`not`, parenthesization, string/number/bool literals, bare
//! memory-key references, and the builtins `str`, `len`, `lower`. There is
//! no attribute access and no function invocation outside that allowlist —
//! this is a mini-parser producing its own AST, not a general-purpose
//! expression evaluator (see spec design notes). Evaluation is pure and
//! never throws on a missing key: absent keys evaluate as `false`.

use crate::error::{GraphError, GraphResult};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
    Absent,
}

impl Value {
    fn from_json(v: &JsonValue) -> Self {
        match v {
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Absent),
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Null => Value::Absent,
            _ => Value::Absent,
        }
    }

    /// Truthiness used by boolean operators and as an expression's final
    /// verdict. Booleans and the fixed string literals `"true"`/`"false"`
    /// (case-insensitive) are the only accepted loop-continuation encodings
    /// per the spec's resolved open question; no other string is truthy.
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => s.eq_ignore_ascii_case("true"),
            Value::Number(n) => *n != 0.0,
            Value::Absent => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    True,
    False,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
}

fn lex(src: &str) -> GraphResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(GraphError::invalid_spec("unterminated string literal"));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| GraphError::invalid_spec(format!("bad number literal '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "not" => Token::Not,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(GraphError::invalid_spec(format!(
                    "unexpected character '{other}' in condition_expr"
                )));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Key(String),
    Call(String, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

const ALLOWED_BUILTINS: &[&str] = &["str", "len", "lower"];

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &Token) -> GraphResult<()> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(GraphError::invalid_spec(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> GraphResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> GraphResult<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> GraphResult<Expr> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> GraphResult<Expr> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> GraphResult<Expr> {
        let lhs = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_primary()?;
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> GraphResult<Expr> {
        match self.advance() {
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) && ALLOWED_BUILTINS.contains(&name.as_str()) {
                    self.advance();
                    let arg = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else if matches!(self.peek(), Some(Token::LParen)) {
                    Err(GraphError::invalid_spec(format!(
                        "function '{name}' is not in the allowed builtin list"
                    )))
                } else {
                    Ok(Expr::Key(name))
                }
            }
            other => Err(GraphError::invalid_spec(format!(
                "unexpected token in condition_expr: {other:?}"
            ))),
        }
    }
}

fn parse(src: &str) -> GraphResult<Expr> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(GraphError::invalid_spec(
            "trailing tokens after a complete condition_expr",
        ));
    }
    Ok(expr)
}

fn eval(expr: &Expr, memory: &HashMap<String, JsonValue>) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Key(k) => memory.get(k).map(Value::from_json).unwrap_or(Value::Absent),
        Expr::Not(inner) => Value::Bool(!eval(inner, memory).truthy()),
        Expr::And(a, b) => Value::Bool(eval(a, memory).truthy() && eval(b, memory).truthy()),
        Expr::Or(a, b) => Value::Bool(eval(a, memory).truthy() || eval(b, memory).truthy()),
        Expr::Cmp(op, a, b) => Value::Bool(compare(*op, &eval(a, memory), &eval(b, memory))),
        Expr::Call(name, arg) => {
            let v = eval(arg, memory);
            match name.as_str() {
                "str" => Value::Str(to_display_string(&v)),
                "len" => Value::Number(value_len(&v) as f64),
                "lower" => Value::Str(to_display_string(&v).to_lowercase()),
                _ => Value::Absent,
            }
        }
    }
}

fn to_display_string(v: &Value) -> String {
    match v {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Str(s) => s.clone(),
        Value::Absent => String::new(),
    }
}

fn value_len(v: &Value) -> usize {
    match v {
        Value::Str(s) => s.chars().count(),
        Value::Absent => 0,
        _ => to_display_string(v).len(),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    use CmpOp::*;
    let ordering = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Absent, Value::Absent) => Some(std::cmp::Ordering::Equal),
        _ => None,
    };
    match op {
        Eq => a == b,
        Ne => a != b,
        Lt => ordering == Some(std::cmp::Ordering::Less),
        Le => matches!(
            ordering,
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        Gt => ordering == Some(std::cmp::Ordering::Greater),
        Ge => matches!(
            ordering,
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
    }
}

/// Parse and evaluate `expr` against `memory` in one call, returning the
/// boolean verdict. Missing keys evaluate as absent (falsy); this function
/// never panics or returns an error for a well-formed expression over
/// unknown keys — only a syntactically invalid `condition_expr` errors.
pub fn evaluate(expr: &str, memory: &HashMap<String, JsonValue>) -> GraphResult<bool> {
    let ast = parse(expr)?;
    Ok(eval(&ast, memory).truthy())
}
