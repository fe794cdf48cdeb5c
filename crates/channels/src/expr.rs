//! Boolean and value expressions used by category and attribute mappings.
//!
//! The built-in evaluator understands a small language:
//!
//! ```text
//! values.color == "red" && (item.typeId == 3 || !values["on sale"])
//! name.ru
//! ```
//!
//! Roots are `values`, `name` and `item` (`id`, `identifier`, `typeId`,
//! `path`). Operators are `==`, `!=`, `&&`, `||` and `!`; literals are
//! strings, numbers, `true`, `false` and `null`.

use {async_trait::async_trait, marketsync_common::value, serde_json::Value};

use crate::{
    Error, Result,
    types::{Channel, Item},
};

/// Evaluates mapping expressions against an item.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    async fn evaluate(&self, channel: &Channel, item: &Item, expr: &str) -> Result<Value>;
}

/// Evaluator for the built-in expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicExpressionEvaluator;

#[async_trait]
impl ExpressionEvaluator for BasicExpressionEvaluator {
    async fn evaluate(&self, _channel: &Channel, item: &Item, expr: &str) -> Result<Value> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            item,
        };
        let out = parser.or()?;
        if parser.pos != tokens.len() {
            return Err(Error::invalid_input(format!(
                "unexpected trailing input in expression: {expr}"
            )));
        }
        Ok(out)
    }
}

// ── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Eq,
    Ne,
    And,
    Or,
    Not,
}

/// Whole literals become integers so `300` stays `300` in outgoing payloads.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                out.push(Token::Dot);
                i += 1;
            },
            '[' => {
                out.push(Token::LBracket);
                i += 1;
            },
            ']' => {
                out.push(Token::RBracket);
                i += 1;
            },
            '(' => {
                out.push(Token::LParen);
                i += 1;
            },
            ')' => {
                out.push(Token::RParen);
                i += 1;
            },
            '=' if next == Some('=') => {
                // `===` is accepted as `==`.
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                out.push(Token::Eq);
            },
            '!' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                out.push(Token::Ne);
            },
            '!' => {
                out.push(Token::Not);
                i += 1;
            },
            '&' if next == Some('&') => {
                out.push(Token::And);
                i += 2;
            },
            '|' if next == Some('|') => {
                out.push(Token::Or);
                i += 2;
            },
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::invalid_input("unterminated string literal")),
                        Some(&ch) if ch == quote => break,
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                s.push(escaped);
                            }
                            i += 2;
                            continue;
                        },
                        Some(&ch) => s.push(ch),
                    }
                    i += 1;
                }
                i += 1;
                out.push(Token::Str(s));
            },
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(|ch| ch.is_ascii_digit() || *ch == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse()
                    .map_err(|_| Error::invalid_input(format!("invalid number: {text}")))?;
                out.push(Token::Num(num));
            },
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '$')
                {
                    i += 1;
                }
                out.push(Token::Ident(chars[start..i].iter().collect()));
            },
            other => {
                return Err(Error::invalid_input(format!(
                    "unexpected character '{other}' in expression"
                )));
            },
        }
    }
    Ok(out)
}

// ── Parser / evaluator ──────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    item: &'a Item,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Value> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Value::Bool(value::is_truthy(&left) || value::is_truthy(&right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        while self.eat(&Token::And) {
            let right = self.unary()?;
            left = Value::Bool(value::is_truthy(&left) && value::is_truthy(&right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value> {
        if self.eat(&Token::Not) {
            let inner = self.unary()?;
            return Ok(Value::Bool(!value::is_truthy(&inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value> {
        let left = self.primary()?;
        if self.eat(&Token::Eq) {
            let right = self.primary()?;
            return Ok(Value::Bool(value::loose_eq(&left, &right)));
        }
        if self.eat(&Token::Ne) {
            let right = self.primary()?;
            return Ok(Value::Bool(!value::loose_eq(&left, &right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Value> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| Error::invalid_input("unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::LParen => {
                let inner = self.or()?;
                if !self.eat(&Token::RParen) {
                    return Err(Error::invalid_input("missing ')' in expression"));
                }
                Ok(inner)
            },
            Token::Str(s) => Ok(Value::String(s)),
            Token::Num(n) => Ok(number_value(n)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                _ => self.path(&name),
            },
            other => Err(Error::invalid_input(format!(
                "unexpected token {other:?} in expression"
            ))),
        }
    }

    fn path(&mut self, root: &str) -> Result<Value> {
        let mut current = match root {
            "values" => Value::Object(self.item.values.clone()),
            "name" => serde_json::to_value(&self.item.name)?,
            "item" => serde_json::json!({
                "id": self.item.id,
                "identifier": self.item.identifier,
                "typeId": self.item.type_id,
                "path": self.item.path,
                "values": self.item.values,
                "name": self.item.name,
            }),
            other => {
                return Err(Error::invalid_input(format!(
                    "unknown identifier '{other}' in expression"
                )));
            },
        };
        loop {
            let key = if self.eat(&Token::Dot) {
                match self.peek().cloned() {
                    Some(Token::Ident(k)) => {
                        self.pos += 1;
                        k
                    },
                    Some(Token::Num(n)) => {
                        self.pos += 1;
                        n.to_string()
                    },
                    _ => return Err(Error::invalid_input("expected property name after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let key = match self.peek().cloned() {
                    Some(Token::Str(k)) => k,
                    Some(Token::Num(n)) => n.to_string(),
                    _ => return Err(Error::invalid_input("expected key inside '[]'")),
                };
                self.pos += 1;
                if !self.eat(&Token::RBracket) {
                    return Err(Error::invalid_input("missing ']' in expression"));
                }
                key
            } else {
                return Ok(current);
            };
            current = match current {
                Value::Object(mut map) => map.remove(&key).unwrap_or(Value::Null),
                Value::Array(mut list) => match key.parse::<usize>() {
                    Ok(idx) if idx < list.len() => list.swap_remove(idx),
                    _ => Value::Null,
                },
                _ => Value::Null,
            };
        }
    }
}
