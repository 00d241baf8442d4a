//! Expression engine for pre/postconditions
//!
//! Conditions are written in a CEL-compatible dialect: identifiers and
//! member paths over the `request` / `response` / `span` / `vars`
//! environment, literals, comparison and boolean operators, and the
//! `matches` / `startsWith` / `endsWith` / `contains` string methods
//! plus the `has` and `size` builtins.
//!
//! The engine sits behind the small [`ExprEngine`] trait so the dialect
//! can be swapped without touching the condition evaluator. Errors keep
//! their phase (`compile`, `program`, `runtime`); the condition layer
//! maps any of them to SKIP rather than FAIL.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// The variable environment an expression is evaluated against
pub type Env = BTreeMap<String, Value>;

/// An expression engine: compile once, evaluate against an environment
pub trait ExprEngine {
    fn compile(&self, source: &str) -> Result<Program, ExprError>;
    fn evaluate(&self, program: &Program, env: &Env) -> Result<Value, ExprError>;
}

/// Errors from compiling or evaluating an expression, tagged by phase
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("{0}")]
    Compile(String),
    #[error("{0}")]
    Program(String),
    #[error("{0}")]
    Runtime(String),
}

impl ExprError {
    /// The phase the error belongs to, for SKIP messages
    pub fn phase(&self) -> &'static str {
        match self {
            ExprError::Compile(_) => "compile",
            ExprError::Program(_) => "program",
            ExprError::Runtime(_) => "runtime",
        }
    }
}

/// A compiled expression
#[derive(Clone, Debug)]
pub struct Program {
    ast: Expr,
    regexes: Vec<Regex>,
}

/// The in-tree CEL-subset engine
#[derive(Clone, Copy, Debug, Default)]
pub struct CelEngine;

impl CelEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ExprEngine for CelEngine {
    fn compile(&self, source: &str) -> Result<Program, ExprError> {
        let tokens = tokenize(source).map_err(ExprError::Compile)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            patterns: Vec::new(),
        };
        let ast = parser.parse_expr().map_err(ExprError::Compile)?;
        if parser.pos != parser.tokens.len() {
            return Err(ExprError::Compile(format!(
                "unexpected trailing input at token {}",
                parser.pos + 1
            )));
        }
        // Regex literals are built here so pattern errors surface as
        // program-phase failures, separate from parse failures.
        let mut regexes = Vec::with_capacity(parser.patterns.len());
        for pattern in &parser.patterns {
            let re = Regex::new(pattern)
                .map_err(|e| ExprError::Program(format!("invalid pattern '{}': {}", pattern, e)))?;
            regexes.push(re);
        }
        Ok(Program { ast, regexes })
    }

    fn evaluate(&self, program: &Program, env: &Env) -> Result<Value, ExprError> {
        eval(&program.ast, env, &program.regexes)
    }
}

// ── Tokens ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    EqEq,
    NotEq,
    Le,
    Ge,
    Lt,
    Gt,
    AndAnd,
    OrOr,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    return Err("unexpected '=' (did you mean '==')".into());
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err("unexpected '&' (did you mean '&&')".into());
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err("unexpected '|' (did you mean '||')".into());
                }
            }
            '\'' | '"' => {
                tokens.push(Token::Str(lex_string(&mut chars)?));
            }
            '-' | '0'..='9' => {
                tokens.push(lex_number(&mut chars)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(ident),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let quote = chars.next().expect("caller checked the opening quote");
    let mut out = String::new();
    while let Some(c) = chars.next() {
        if c == quote {
            return Ok(out);
        }
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => return Err("unterminated escape in string literal".into()),
            }
        } else {
            out.push(c);
        }
    }
    Err("unterminated string literal".into())
}

fn lex_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Token, String> {
    let mut text = String::new();
    if chars.peek() == Some(&'-') {
        text.push('-');
        chars.next();
    }
    let mut is_float = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            chars.next();
        } else if c == '.' {
            // a digit must follow, otherwise this dot is a member access
            let mut lookahead = chars.clone();
            lookahead.next();
            match lookahead.peek() {
                Some(d) if d.is_ascii_digit() => {
                    is_float = true;
                    text.push(c);
                    chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }
    if text == "-" {
        return Err("unexpected '-'".into());
    }
    if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| format!("invalid number '{}'", text))
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| format!("invalid number '{}'", text))
    }
}

// ── AST & parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum StrOp {
    StartsWith,
    EndsWith,
    Contains,
}

#[derive(Clone, Debug)]
enum Expr {
    Lit(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Has(Box<Expr>),
    Size(Box<Expr>),
    /// `recv.matches("pattern")`; the index points into the program's
    /// prepared regex table
    Matches(Box<Expr>, usize),
    StrCall(StrOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    patterns: Vec<String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.advance() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", token, t)),
            None => Err(format!("expected {:?}, found end of expression", token)),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Cmp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Cmp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        other => return Err(format!("expected field name after '.', found {:?}", other)),
                    };
                    if self.peek() == Some(&Token::LParen) {
                        expr = self.parse_method(expr, &name)?;
                    } else {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let idx = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_method(&mut self, recv: Expr, name: &str) -> Result<Expr, String> {
        self.expect(Token::LParen)?;
        match name {
            "matches" => {
                let pattern = match self.advance() {
                    Some(Token::Str(p)) => p,
                    other => {
                        return Err(format!(
                            "matches() requires a literal string pattern, found {:?}",
                            other
                        ))
                    }
                };
                self.expect(Token::RParen)?;
                let idx = self.patterns.len();
                self.patterns.push(pattern);
                Ok(Expr::Matches(Box::new(recv), idx))
            }
            "startsWith" | "endsWith" | "contains" => {
                let arg = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let op = match name {
                    "startsWith" => StrOp::StartsWith,
                    "endsWith" => StrOp::EndsWith,
                    _ => StrOp::Contains,
                };
                Ok(Expr::StrCall(op, Box::new(recv), Box::new(arg)))
            }
            other => Err(format!("unsupported method '{}'", other)),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Lit(Value::from(n))),
            Some(Token::Float(f)) => Ok(Expr::Lit(
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| format!("invalid float literal {}", f))?,
            )),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Token::True) => Ok(Expr::Lit(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Lit(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Lit(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let arg = self.parse_expr()?;
                    self.expect(Token::RParen)?;
                    match name.as_str() {
                        "has" => {
                            if !matches!(arg, Expr::Member(_, _)) {
                                return Err("has() requires a field selection argument".into());
                            }
                            Ok(Expr::Has(Box::new(arg)))
                        }
                        "size" => Ok(Expr::Size(Box::new(arg))),
                        other => Err(format!("unsupported function '{}'", other)),
                    }
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".into()),
        }
    }
}

// ── Evaluation ───────────────────────────────────────────────────────

fn eval(expr: &Expr, env: &Env, regexes: &[Regex]) -> Result<Value, ExprError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::Runtime(format!("undeclared reference to '{}'", name))),
        Expr::Member(base, field) => {
            let base = eval(base, env, regexes)?;
            match base {
                Value::Object(map) => map
                    .get(field)
                    .cloned()
                    .ok_or_else(|| ExprError::Runtime(format!("no such field: '{}'", field))),
                other => Err(ExprError::Runtime(format!(
                    "field selection on non-object value ({})",
                    type_name(&other)
                ))),
            }
        }
        Expr::Index(base, idx) => {
            let base = eval(base, env, regexes)?;
            let idx = eval(idx, env, regexes)?;
            match (&base, &idx) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = n
                        .as_i64()
                        .ok_or_else(|| ExprError::Runtime("non-integer index".into()))?;
                    items
                        .get(usize::try_from(i).map_err(|_| {
                            ExprError::Runtime(format!("index out of range: {}", i))
                        })?)
                        .cloned()
                        .ok_or_else(|| ExprError::Runtime(format!("index out of range: {}", i)))
                }
                (Value::Object(map), Value::String(key)) => map
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ExprError::Runtime(format!("no such key: '{}'", key))),
                _ => Err(ExprError::Runtime(format!(
                    "cannot index {} with {}",
                    type_name(&base),
                    type_name(&idx)
                ))),
            }
        }
        Expr::Not(inner) => {
            let v = eval(inner, env, regexes)?;
            match v {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(ExprError::Runtime(format!(
                    "'!' applied to non-boolean ({})",
                    type_name(&other)
                ))),
            }
        }
        Expr::And(left, right) => {
            if !eval_bool(left, env, regexes)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(right, env, regexes)?))
        }
        Expr::Or(left, right) => {
            if eval_bool(left, env, regexes)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(right, env, regexes)?))
        }
        Expr::Cmp(op, left, right) => {
            let left = eval(left, env, regexes)?;
            let right = eval(right, env, regexes)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
        Expr::Has(inner) => {
            let Expr::Member(base, field) = inner.as_ref() else {
                return Err(ExprError::Runtime("has() requires a field selection".into()));
            };
            match eval(base, env, regexes) {
                Ok(Value::Object(map)) => Ok(Value::Bool(map.contains_key(field))),
                Ok(_) | Err(_) => Ok(Value::Bool(false)),
            }
        }
        Expr::Size(inner) => {
            let v = eval(inner, env, regexes)?;
            let n = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(ExprError::Runtime(format!(
                        "size() of {} is not defined",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(n as i64))
        }
        Expr::Matches(recv, idx) => {
            let v = eval(recv, env, regexes)?;
            let Value::String(s) = v else {
                return Err(ExprError::Runtime(format!(
                    "matches() on non-string value ({})",
                    type_name(&v)
                )));
            };
            let re = regexes
                .get(*idx)
                .ok_or_else(|| ExprError::Runtime("missing prepared pattern".into()))?;
            Ok(Value::Bool(re.is_match(&s)))
        }
        Expr::StrCall(op, recv, arg) => {
            let recv = eval(recv, env, regexes)?;
            let arg = eval(arg, env, regexes)?;
            let (Value::String(s), Value::String(needle)) = (&recv, &arg) else {
                return Err(ExprError::Runtime("string method on non-string value".into()));
            };
            let result = match op {
                StrOp::StartsWith => s.starts_with(needle.as_str()),
                StrOp::EndsWith => s.ends_with(needle.as_str()),
                StrOp::Contains => s.contains(needle.as_str()),
            };
            Ok(Value::Bool(result))
        }
    }
}

fn eval_bool(expr: &Expr, env: &Env, regexes: &[Regex]) -> Result<bool, ExprError> {
    match eval(expr, env, regexes)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::Runtime(format!(
            "boolean operator applied to {}",
            type_name(&other)
        ))),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (
                        a.as_f64().unwrap_or(f64::NAN),
                        b.as_f64().unwrap_or(f64::NAN),
                    );
                    a.partial_cmp(&b).ok_or_else(|| {
                        ExprError::Runtime("cannot order non-finite numbers".into())
                    })?
                }
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    return Err(ExprError::Runtime(format!(
                        "cannot order {} and {}",
                        type_name(left),
                        type_name(right)
                    )))
                }
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            })
        }
    }
}

/// Equality with numeric cross-type comparison (1 == 1.0)
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        _ => left == right,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
