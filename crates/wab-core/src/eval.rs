//! Owner-console expression language.
//!
//! The eval triggers give the bot owner a small calculator/inspection
//! language over the live invocation context. Parsing and execution are
//! separate phases: `check_expression` / `check_program` validate syntax
//! without running anything, and evaluation captures every fault as an
//! [`EvalError`] instead of propagating it.
//!
//! Grammar, loosely:
//!
//! ```text
//! program  := stmt (';' stmt)* ';'?
//! stmt     := 'let' ident '=' expr | expr
//! expr     := or
//! or       := and ('||' and)*
//! and      := equality ('&&' equality)*
//! equality := compare (('==' | '!=') compare)*
//! compare  := additive (('<' | '<=' | '>' | '>=') additive)*
//! additive := term (('+' | '-') term)*
//! term     := unary (('*' | '/' | '%') unary)*
//! unary    := ('-' | '!') unary | postfix
//! postfix  := primary ('[' expr ']')*
//! primary  := int | float | string | 'true' | 'false' | ident ('(' args ')')?
//!           | '[' args ']' | '(' expr ')'
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;

/// Result of evaluating an expression or program.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "{s:?}")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// Parse failure; reported to the owner verbatim, execution never starts.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntaxError {
    pub pos: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at position {}: {}", self.pos, self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// Runtime failure; captured and formatted as the result, never propagated.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("{0} expects {1} argument(s), got {2}")]
    Arity(&'static str, usize, usize),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("index {0} out of bounds (len {1})")]
    IndexOutOfBounds(i64, usize),
}

// ============== Lexer ==============

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Let,
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Int(n) => format!("`{n}`"),
            Tok::Float(x) => format!("`{x}`"),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Ident(name) => format!("`{name}`"),
            Tok::Eof => "end of input".to_string(),
            Tok::Let => "`let`".to_string(),
            Tok::True => "`true`".to_string(),
            Tok::False => "`false`".to_string(),
            Tok::Plus => "`+`".to_string(),
            Tok::Minus => "`-`".to_string(),
            Tok::Star => "`*`".to_string(),
            Tok::Slash => "`/`".to_string(),
            Tok::Percent => "`%`".to_string(),
            Tok::Bang => "`!`".to_string(),
            Tok::Assign => "`=`".to_string(),
            Tok::Eq => "`==`".to_string(),
            Tok::Ne => "`!=`".to_string(),
            Tok::Lt => "`<`".to_string(),
            Tok::Le => "`<=`".to_string(),
            Tok::Gt => "`>`".to_string(),
            Tok::Ge => "`>=`".to_string(),
            Tok::AndAnd => "`&&`".to_string(),
            Tok::OrOr => "`||`".to_string(),
            Tok::LParen => "`(`".to_string(),
            Tok::RParen => "`)`".to_string(),
            Tok::LBracket => "`[`".to_string(),
            Tok::RBracket => "`]`".to_string(),
            Tok::Comma => "`,`".to_string(),
            Tok::Semi => "`;`".to_string(),
        }
    }
}

fn lex(src: &str) -> Result<Vec<(Tok, usize)>, SyntaxError> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        match c {
            '+' => {
                toks.push((Tok::Plus, start));
                i += 1;
            }
            '-' => {
                toks.push((Tok::Minus, start));
                i += 1;
            }
            '*' => {
                toks.push((Tok::Star, start));
                i += 1;
            }
            '/' => {
                toks.push((Tok::Slash, start));
                i += 1;
            }
            '%' => {
                toks.push((Tok::Percent, start));
                i += 1;
            }
            '(' => {
                toks.push((Tok::LParen, start));
                i += 1;
            }
            ')' => {
                toks.push((Tok::RParen, start));
                i += 1;
            }
            '[' => {
                toks.push((Tok::LBracket, start));
                i += 1;
            }
            ']' => {
                toks.push((Tok::RBracket, start));
                i += 1;
            }
            ',' => {
                toks.push((Tok::Comma, start));
                i += 1;
            }
            ';' => {
                toks.push((Tok::Semi, start));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push((Tok::Eq, start));
                    i += 2;
                } else {
                    toks.push((Tok::Assign, start));
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push((Tok::Ne, start));
                    i += 2;
                } else {
                    toks.push((Tok::Bang, start));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push((Tok::Le, start));
                    i += 2;
                } else {
                    toks.push((Tok::Lt, start));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push((Tok::Ge, start));
                    i += 2;
                } else {
                    toks.push((Tok::Gt, start));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    toks.push((Tok::AndAnd, start));
                    i += 2;
                } else {
                    return Err(SyntaxError {
                        pos: start,
                        message: "expected `&&`".to_string(),
                    });
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    toks.push((Tok::OrOr, start));
                    i += 2;
                } else {
                    return Err(SyntaxError {
                        pos: start,
                        message: "expected `||`".to_string(),
                    });
                }
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(SyntaxError {
                                pos: start,
                                message: "unterminated string literal".to_string(),
                            });
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('\\') => s.push('\\'),
                                Some('"') => s.push('"'),
                                other => {
                                    return Err(SyntaxError {
                                        pos: i,
                                        message: format!(
                                            "invalid escape `\\{}`",
                                            other.map(|c| c.to_string()).unwrap_or_default()
                                        ),
                                    });
                                }
                            }
                            i += 1;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                toks.push((Tok::Str(s), start));
            }
            c if c.is_ascii_digit() => {
                let mut end = i;
                let mut is_float = false;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                if end < chars.len()
                    && chars[end] == '.'
                    && chars.get(end + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)
                {
                    is_float = true;
                    end += 1;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                let text: String = chars[i..end].iter().collect();
                let tok = if is_float {
                    Tok::Float(text.parse::<f64>().map_err(|_| SyntaxError {
                        pos: start,
                        message: format!("invalid number `{text}`"),
                    })?)
                } else {
                    Tok::Int(text.parse::<i64>().map_err(|_| SyntaxError {
                        pos: start,
                        message: format!("integer literal `{text}` is too large"),
                    })?)
                };
                toks.push((tok, start));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[i..end].iter().collect();
                let tok = match name.as_str() {
                    "let" => Tok::Let,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    _ => Tok::Ident(name),
                };
                toks.push((tok, start));
                i = end;
            }
            other => {
                return Err(SyntaxError {
                    pos: start,
                    message: format!("unexpected character `{other}`"),
                });
            }
        }
    }

    toks.push((Tok::Eof, chars.len()));
    Ok(toks)
}

// ============== Parser ==============

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Var(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let(String, Expr),
    Expr(Expr),
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.at].0
    }

    fn pos(&self) -> usize {
        self.toks[self.at].1
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.at].0.clone();
        if self.at + 1 < self.toks.len() {
            self.at += 1;
        }
        t
    }

    fn expect(&mut self, want: Tok) -> Result<(), SyntaxError> {
        if *self.peek() == want {
            self.bump();
            return Ok(());
        }
        Err(SyntaxError {
            pos: self.pos(),
            message: format!("expected {}, found {}", want.describe(), self.peek().describe()),
        })
    }

    fn program(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            // Allow (and fold away) empty statements / a trailing semicolon.
            while *self.peek() == Tok::Semi {
                self.bump();
            }
            if *self.peek() == Tok::Eof {
                break;
            }
            stmts.push(self.stmt()?);
            match self.peek() {
                Tok::Semi => {
                    self.bump();
                }
                Tok::Eof => break,
                other => {
                    return Err(SyntaxError {
                        pos: self.pos(),
                        message: format!("expected `;` or end of input, found {}", other.describe()),
                    });
                }
            }
        }
        if stmts.is_empty() {
            return Err(SyntaxError {
                pos: self.pos(),
                message: "empty program".to_string(),
            });
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if *self.peek() == Tok::Let {
            self.bump();
            let name = match self.bump() {
                Tok::Ident(name) => name,
                other => {
                    return Err(SyntaxError {
                        pos: self.pos(),
                        message: format!("expected identifier after `let`, found {}", other.describe()),
                    });
                }
            };
            self.expect(Tok::Assign)?;
            let value = self.expr()?;
            return Ok(Stmt::Let(name, value));
        }
        Ok(Stmt::Expr(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.and()?;
        while *self.peek() == Tok::OrOr {
            self.bump();
            let rhs = self.and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.equality()?;
        while *self.peek() == Tok::AndAnd {
            self.bump();
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.compare()?;
        loop {
            let op = match self.peek() {
                Tok::Eq => BinOp::Eq,
                Tok::Ne => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.compare()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn compare(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek() {
            Tok::Minus => {
                self.bump();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Tok::Bang => {
                self.bump();
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut e = self.primary()?;
        while *self.peek() == Tok::LBracket {
            self.bump();
            let idx = self.expr()?;
            self.expect(Tok::RBracket)?;
            e = Expr::Index(Box::new(e), Box::new(idx));
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let pos = self.pos();
        match self.bump() {
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Float(x) => Ok(Expr::Float(x)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::Ident(name) => {
                if *self.peek() == Tok::LParen {
                    self.bump();
                    let args = self.args(Tok::RParen)?;
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Var(name))
            }
            Tok::LBracket => {
                let items = self.args(Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Tok::LParen => {
                let e = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(e)
            }
            other => Err(SyntaxError {
                pos,
                message: format!("expected expression, found {}", other.describe()),
            }),
        }
    }

    fn args(&mut self, close: Tok) -> Result<Vec<Expr>, SyntaxError> {
        let mut out = Vec::new();
        if *self.peek() == close {
            self.bump();
            return Ok(out);
        }
        loop {
            out.push(self.expr()?);
            if *self.peek() == Tok::Comma {
                self.bump();
                continue;
            }
            self.expect(close)?;
            return Ok(out);
        }
    }
}

/// Syntax check for the `evalReturn` trigger: the whole payload must be one
/// expression (the body of an implied `return`).
pub fn check_expression(src: &str) -> Result<Expr, SyntaxError> {
    let mut p = Parser {
        toks: lex(src)?,
        at: 0,
    };
    let e = p.expr()?;
    if *p.peek() != Tok::Eof {
        return Err(SyntaxError {
            pos: p.pos(),
            message: format!("expected end of input, found {}", p.peek().describe()),
        });
    }
    Ok(e)
}

/// Syntax check for the `evalStatement` trigger: a `;`-separated program.
pub fn check_program(src: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let mut p = Parser {
        toks: lex(src)?,
        at: 0,
    };
    p.program()
}

// ============== Evaluator ==============

/// Variable scope; pre-populated with the bounded invocation context.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

pub fn eval_expr(expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Float(x) => Ok(Value::Float(*x)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, scope)?);
            }
            Ok(Value::List(out))
        }
        Expr::Neg(e) => match eval_expr(e, scope)? {
            Value::Int(n) => n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(EvalError::Type(format!("cannot negate {}", other.type_name()))),
        },
        Expr::Not(e) => match eval_expr(e, scope)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::Type(format!("`!` expects bool, got {}", other.type_name()))),
        },
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, scope),
        Expr::Call(name, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(eval_expr(a, scope)?);
            }
            call_builtin(name, vals)
        }
        Expr::Index(target, index) => {
            let target = eval_expr(target, scope)?;
            let index = eval_expr(index, scope)?;
            let Value::Int(i) = index else {
                return Err(EvalError::Type(format!(
                    "index must be int, got {}",
                    index.type_name()
                )));
            };
            match target {
                Value::List(items) => {
                    let len = items.len();
                    usize::try_from(i)
                        .ok()
                        .and_then(|u| items.into_iter().nth(u))
                        .ok_or(EvalError::IndexOutOfBounds(i, len))
                }
                Value::Str(s) => {
                    let len = s.chars().count();
                    usize::try_from(i)
                        .ok()
                        .and_then(|u| s.chars().nth(u))
                        .map(|c| Value::Str(c.to_string()))
                        .ok_or(EvalError::IndexOutOfBounds(i, len))
                }
                other => Err(EvalError::Type(format!("cannot index {}", other.type_name()))),
            }
        }
    }
}

/// Run a statement program; the value is the last expression's (or unit).
pub fn run_program(stmts: &[Stmt], scope: &mut Scope) -> Result<Value, EvalError> {
    let mut last = Value::Unit;
    for stmt in stmts {
        match stmt {
            Stmt::Let(name, expr) => {
                let v = eval_expr(expr, scope)?;
                scope.set(name.clone(), v);
                last = Value::Unit;
            }
            Stmt::Expr(expr) => {
                last = eval_expr(expr, scope)?;
            }
        }
    }
    Ok(last)
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    // Short-circuit logic first.
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = match eval_expr(lhs, scope)? {
            Value::Bool(b) => b,
            other => {
                return Err(EvalError::Type(format!(
                    "logic operator expects bool, got {}",
                    other.type_name()
                )));
            }
        };
        if op == BinOp::And && !l {
            return Ok(Value::Bool(false));
        }
        if op == BinOp::Or && l {
            return Ok(Value::Bool(true));
        }
        return match eval_expr(rhs, scope)? {
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => Err(EvalError::Type(format!(
                "logic operator expects bool, got {}",
                other.type_name()
            ))),
        };
    }

    let l = eval_expr(lhs, scope)?;
    let r = eval_expr(rhs, scope)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, l, r),
        BinOp::Add => add(l, r),
        BinOp::Sub => arith(op, l, r),
        BinOp::Mul => arith(op, l, r),
        BinOp::Div => arith(op, l, r),
        BinOp::Rem => arith(op, l, r),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn add(l: Value, r: Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (l, r) => arith(BinOp::Add, l, r),
    }
}

fn arith(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, a, b),
        (Value::Float(a), Value::Float(b)) => float_arith(op, a, b),
        (Value::Int(a), Value::Float(b)) => float_arith(op, a as f64, b),
        (Value::Float(a), Value::Int(b)) => float_arith(op, a, b as f64),
        (l, r) => Err(EvalError::Type(format!(
            "cannot apply arithmetic to {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let out = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_rem(b)
        }
        _ => unreachable!("not an arithmetic op"),
    };
    out.map(Value::Int).ok_or(EvalError::Overflow)
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<Value, EvalError> {
    let out = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
        _ => unreachable!("not an arithmetic op"),
    };
    Ok(Value::Float(out))
}

fn compare(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    let ord = match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => None,
    };
    let Some(ord) = ord else {
        return Err(EvalError::Type(format!(
            "cannot compare {} and {}",
            l.type_name(),
            r.type_name()
        )));
    };
    let b = match op {
        BinOp::Lt => ord.is_lt(),
        BinOp::Le => ord.is_le(),
        BinOp::Gt => ord.is_gt(),
        BinOp::Ge => ord.is_ge(),
        _ => unreachable!("not a comparison op"),
    };
    Ok(Value::Bool(b))
}

fn call_builtin(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "len" => {
            let [v] = take_args::<1>("len", args)?;
            match v {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(EvalError::Type(format!("len() expects string or list, got {}", other.type_name()))),
            }
        }
        "str" => {
            let [v] = take_args::<1>("str", args)?;
            Ok(Value::Str(v.to_string()))
        }
        "upper" => {
            let [v] = take_args::<1>("upper", args)?;
            str_fn("upper", v, |s| s.to_uppercase())
        }
        "lower" => {
            let [v] = take_args::<1>("lower", args)?;
            str_fn("lower", v, |s| s.to_lowercase())
        }
        "trim" => {
            let [v] = take_args::<1>("trim", args)?;
            str_fn("trim", v, |s| s.trim().to_string())
        }
        "contains" => {
            let [hay, needle] = take_args::<2>("contains", args)?;
            match (hay, needle) {
                (Value::Str(h), Value::Str(n)) => Ok(Value::Bool(h.contains(&n))),
                (Value::List(items), n) => Ok(Value::Bool(items.contains(&n))),
                (h, _) => Err(EvalError::Type(format!(
                    "contains() expects string or list, got {}",
                    h.type_name()
                ))),
            }
        }
        "now" => {
            if !args.is_empty() {
                return Err(EvalError::Arity("now", 0, args.len()));
            }
            Ok(Value::Str(Utc::now().to_rfc3339()))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

fn take_args<const N: usize>(
    name: &'static str,
    args: Vec<Value>,
) -> Result<[Value; N], EvalError> {
    let got = args.len();
    args.try_into().map_err(|_| EvalError::Arity(name, N, got))
}

fn str_fn(
    name: &'static str,
    v: Value,
    f: impl FnOnce(&str) -> String,
) -> Result<Value, EvalError> {
    match v {
        Value::Str(s) => Ok(Value::Str(f(&s))),
        other => Err(EvalError::Type(format!(
            "{name}() expects string, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> Result<Value, EvalError> {
        let e = check_expression(src).expect("syntax");
        eval_expr(&e, &Scope::new())
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::Int(9));
        assert_eq!(eval("10 / 3").unwrap(), Value::Int(3));
        assert_eq!(eval("10 % 3").unwrap(), Value::Int(1));
        assert_eq!(eval("-2 + 5").unwrap(), Value::Int(3));
        assert_eq!(eval("1 + 2.5").unwrap(), Value::Float(3.5));
    }

    #[test]
    fn strings_lists_and_builtins() {
        assert_eq!(
            eval("\"foo\" + \"bar\"").unwrap(),
            Value::Str("foobar".to_string())
        );
        assert_eq!(eval("len(\"héllo\")").unwrap(), Value::Int(5));
        assert_eq!(eval("upper(\"abc\")").unwrap(), Value::Str("ABC".to_string()));
        assert_eq!(eval("[1, 2] + [3]").unwrap(), Value::List(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3)
        ]));
        assert_eq!(eval("[10, 20, 30][1]").unwrap(), Value::Int(20));
        assert_eq!(eval("contains(\"prekey bundle\", \"prekey\")").unwrap(), Value::Bool(true));
        assert_eq!(eval("str(42) + \"!\"").unwrap(), Value::Str("42!".to_string()));
    }

    #[test]
    fn comparison_and_logic_short_circuit() {
        assert_eq!(eval("1 < 2 && 2 <= 2").unwrap(), Value::Bool(true));
        assert_eq!(eval("\"a\" < \"b\"").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 == 1 || unknown").unwrap(), Value::Bool(true));
        assert_eq!(eval("false && unknown").unwrap(), Value::Bool(false));
        assert_eq!(eval("!false").unwrap(), Value::Bool(true));
    }

    #[test]
    fn runtime_errors_are_captured_values() {
        assert_eq!(eval("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(
            eval("nope"),
            Err(EvalError::UnknownVariable("nope".to_string()))
        );
        assert_eq!(
            eval("frob(1)"),
            Err(EvalError::UnknownFunction("frob".to_string()))
        );
        assert_eq!(eval("[1][5]"), Err(EvalError::IndexOutOfBounds(5, 1)));
        assert_eq!(eval("len(1, 2)"), Err(EvalError::Arity("len", 1, 2)));
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = check_expression("1 +").unwrap_err();
        assert_eq!(err.pos, 3);
        assert!(err.message.contains("expected expression"));

        let err = check_expression("1 2").unwrap_err();
        assert!(err.message.contains("expected end of input"));

        assert!(check_expression("\"open").is_err());
        assert!(check_expression("let x = 1").is_err()); // statement, not expression
    }

    #[test]
    fn programs_bind_lets_and_return_last_expression() {
        let prog = check_program("let x = 2; let y = 3; x * y").unwrap();
        let mut scope = Scope::new();
        assert_eq!(run_program(&prog, &mut scope).unwrap(), Value::Int(6));

        // Trailing let yields unit.
        let prog = check_program("let x = 2;").unwrap();
        let mut scope = Scope::new();
        assert_eq!(run_program(&prog, &mut scope).unwrap(), Value::Unit);
    }

    #[test]
    fn scope_variables_resolve() {
        let mut scope = Scope::new();
        scope.set("sender", Value::Str("111@s.whatsapp.net".to_string()));
        let e = check_expression("upper(sender)").unwrap();
        assert_eq!(
            eval_expr(&e, &scope).unwrap(),
            Value::Str("111@S.WHATSAPP.NET".to_string())
        );
    }
}
