//! Script expression lexer, AST, parser, and evaluator.
//!
//! Expressions are evaluated after variable substitution, so by the time
//! they get here `$(/$i)+1` has become `0+1`.
//!
//! Operator precedence (lowest → highest):
//!   or  →  and  →  comparison  →  additive  →  multiplicative  →  unary  →  primary
//!
//! The ternary operator is written `(?cond;then;else)`. `+` adds when both
//! operands are numbers and concatenates otherwise.

use std::cmp::Ordering;
use std::fmt;

use crate::config::{parse_bool, ConfigError};

// ── Value ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Classifies a bare word: integer, float, boolean, or string.
    fn from_word(word: &str) -> Value {
        if word.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if word.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if word.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(i) = word.parse() {
                return Value::Int(i);
            }
        }
        if word.contains('.') && word.chars().all(|c| c.is_ascii_digit() || c == '.') {
            if let Ok(f) = word.parse() {
                return Value::Float(f);
            }
        }
        Value::Str(word.to_string())
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => parse_bool(s).unwrap_or(false),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Bang,
    LParen,
    RParen,
    Question,
    Semi,
}

const OPERATOR_CHARS: &str = "+-*/%<>=!&|()?;'\"";

// ── Lexer ─────────────────────────────────────────────────────────────────────

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        chars.next();
        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '?' => Token::Question,
            ';' => Token::Semi,
            '<' | '>' | '=' | '!' => {
                let eq = chars.next_if_eq(&'=').is_some();
                match (ch, eq) {
                    ('<', false) => Token::Lt,
                    ('<', true) => Token::Le,
                    ('>', false) => Token::Gt,
                    ('>', true) => Token::Ge,
                    ('=', true) => Token::Eq,
                    ('!', true) => Token::Ne,
                    ('!', false) => Token::Bang,
                    _ => return Err("single '=' (use '==')".to_string()),
                }
            }
            '&' | '|' => {
                if chars.next_if_eq(&ch).is_none() {
                    return Err(format!("single '{ch}' (use '{ch}{ch}')"));
                }
                if ch == '&' {
                    Token::And
                } else {
                    Token::Or
                }
            }
            '\'' | '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => return Err("unterminated string".to_string()),
                        Some(c) if c == ch => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err("unterminated string".to_string()),
                        },
                        Some(c) => s.push(c),
                    }
                }
                Token::Str(s)
            }
            _ => {
                let mut word = String::from(ch);
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || OPERATOR_CHARS.contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                Token::Word(word)
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
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

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {:?}", self.peek()))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;

        match token {
            Token::Word(word) => Ok(Expr::Lit(Value::from_word(&word))),
            Token::Str(s) => Ok(Expr::Lit(Value::Str(s))),
            Token::LParen if self.eat(&Token::Question) => {
                let cond = self.parse_or()?;
                self.expect(&Token::Semi)?;
                let then = self.parse_or()?;
                self.expect(&Token::Semi)?;
                let otherwise = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Ternary(
                    Box::new(cond),
                    Box::new(then),
                    Box::new(otherwise),
                ))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(format!("unexpected {other:?}")),
        }
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

fn eval(expr: &Expr) -> Result<Value, String> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Neg(inner) => match eval(inner)? {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(format!("cannot negate '{other}'")),
        },
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner)?.is_truthy())),
        Expr::And(lhs, rhs) => Ok(Value::Bool(eval(lhs)?.is_truthy() && eval(rhs)?.is_truthy())),
        Expr::Or(lhs, rhs) => Ok(Value::Bool(eval(lhs)?.is_truthy() || eval(rhs)?.is_truthy())),
        Expr::Ternary(cond, then, otherwise) => {
            if eval(cond)?.is_truthy() {
                eval(then)
            } else {
                eval(otherwise)
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs)?, eval(rhs)?),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    match op {
        BinOp::Add => Ok(match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(*a as f64 + *b as f64),
            },
            _ if lhs.is_number() && rhs.is_number() => {
                Value::Float(lhs.as_f64().unwrap_or(0.0) + rhs.as_f64().unwrap_or(0.0))
            }
            _ => Value::Str(format!("{lhs}{rhs}")),
        }),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(op, &lhs, &rhs),
        BinOp::Eq => Ok(Value::Bool(compare(&lhs, &rhs) == Ordering::Equal)),
        BinOp::Ne => Ok(Value::Bool(compare(&lhs, &rhs) != Ordering::Equal)),
        BinOp::Lt => Ok(Value::Bool(compare(&lhs, &rhs) == Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(compare(&lhs, &rhs) != Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(compare(&lhs, &rhs) == Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(compare(&lhs, &rhs) != Ordering::Less)),
    }
}

fn arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div | BinOp::Rem if b == 0 => return Err("division by zero".to_string()),
            BinOp::Div if a % b != 0 => return Ok(Value::Float(a as f64 / b as f64)),
            BinOp::Div => a.checked_div(b),
            BinOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string());
    }

    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(format!("'{lhs}' and '{rhs}' must both be numbers"));
    };
    match op {
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::Rem if b == 0.0 => Err("division by zero".to_string()),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::Rem => Ok(Value::Float(a % b)),
        _ => Err("unsupported operator".to_string()),
    }
}

/// Numbers compare numerically, everything else by text.
fn compare(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => lhs.to_string().cmp(&rhs.to_string()),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Parses and evaluates `src`. An empty expression is the empty string.
pub fn evaluate(src: &str) -> Result<Value, ConfigError> {
    let fail = |reason: String| ConfigError::Expression {
        expr: src.to_string(),
        reason,
    };

    let tokens = tokenize(src).map_err(fail)?;
    if tokens.is_empty() {
        return Ok(Value::Str(String::new()));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or().map_err(fail)?;
    if let Some(extra) = parser.peek() {
        return Err(fail(format!("unexpected {extra:?}")));
    }
    eval(&expr).map_err(fail)
}
