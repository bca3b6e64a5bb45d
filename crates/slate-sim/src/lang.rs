//! The simulated cell language.
//!
//! Statements are separated by newlines or `;`:
//!
//! ```text
//! #r "Charts.Integration"   reference
//! x = 1 + 2                 assignment
//! print x * 2               captured output
//! throw "bad input"         remote exception
//! crash                     agent terminates
//! clear                     clear sentinel
//! x - 1                     bare expression (the cell's result)
//! // comment
//! ```
//!
//! Expressions are 64-bit integers, identifiers, `+ - * /`, unary minus and
//! parentheses.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use slate_core::{AssemblyReference, Diagnostic};

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Int(i64),
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("name '{0}' is not defined")]
    UnknownName(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow")]
    Overflow,
}

impl RuntimeError {
    /// Exception type name reported to the front end.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UnknownName(_) => "NameError",
            Self::DivideByZero => "DivideByZeroError",
            Self::Overflow => "OverflowError",
        }
    }
}

impl Expr {
    pub fn eval(&self, globals: &FxHashMap<String, i64>) -> Result<i64, RuntimeError> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Var(name) => globals
                .get(name)
                .copied()
                .ok_or_else(|| RuntimeError::UnknownName(name.clone())),
            Self::Neg(inner) => inner.eval(globals)?.checked_neg().ok_or(RuntimeError::Overflow),
            Self::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(globals)?;
                let rhs = rhs.eval(globals)?;
                let value = match op {
                    BinaryOp::Add => lhs.checked_add(rhs),
                    BinaryOp::Sub => lhs.checked_sub(rhs),
                    BinaryOp::Mul => lhs.checked_mul(rhs),
                    BinaryOp::Div if rhs == 0 => return Err(RuntimeError::DivideByZero),
                    BinaryOp::Div => lhs.checked_div(rhs),
                };
                value.ok_or(RuntimeError::Overflow)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Reference(String),
    Assign { name: String, value: Expr },
    Print(Expr),
    Throw(String),
    Crash,
    Clear,
    Expr(Expr),
}

/// A parsed cell, shipped to the agent as the compiled payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    /// The cell ends in a bare expression.
    pub fn is_result_an_expression(&self) -> bool {
        matches!(self.statements.last(), Some(Statement::Expr(_)))
    }

    pub fn references(&self) -> Vec<AssemblyReference> {
        self.statements
            .iter()
            .filter_map(|statement| match statement {
                Statement::Reference(name) => Some(AssemblyReference {
                    name: name.clone(),
                    has_integration: name.ends_with(".Integration"),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Parse a cell. Statements with errors are left out of the program and
/// reported as diagnostics.
pub fn parse(source: &str) -> (Program, Vec<Diagnostic>) {
    let mut program = Program::default();
    let mut diagnostics = Vec::new();

    for (index, line) in source.lines().enumerate() {
        let line_number = index as u32 + 1;
        let code = strip_comment(line);

        let mut column = 1;
        for chunk in code.split(';') {
            let leading = chunk.len() - chunk.trim_start().len();
            let text = chunk.trim();
            if !text.is_empty() {
                match parse_statement(text) {
                    Ok(statement) => program.statements.push(statement),
                    Err(message) => diagnostics
                        .push(Diagnostic::error(message).at(line_number, (column + leading) as u32)),
                }
            }
            column += chunk.len() + 1;
        }
    }

    (program, diagnostics)
}

/// Drop a `//` comment that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let bytes = line.as_bytes();
    for (i, &byte) in bytes.iter().enumerate() {
        match byte {
            b'"' => in_string = !in_string,
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_statement(text: &str) -> Result<Statement, String> {
    if let Some(rest) = text.strip_prefix("#r") {
        return parse_string(rest.trim()).map(Statement::Reference);
    }
    match text {
        "crash" => return Ok(Statement::Crash),
        "clear" => return Ok(Statement::Clear),
        _ => {}
    }
    if let Some(rest) = keyword(text, "throw") {
        return parse_string(rest).map(Statement::Throw);
    }
    if let Some(rest) = keyword(text, "print") {
        return parse_expr(rest).map(Statement::Print);
    }

    if let Some((name, value)) = text.split_once('=') {
        let name = name.trim();
        if !is_identifier(name) {
            return Err(format!("invalid assignment target '{name}'"));
        }
        return parse_expr(value).map(|value| Statement::Assign {
            name: name.to_string(),
            value,
        });
    }

    parse_expr(text).map(Statement::Expr)
}

fn keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn parse_string(text: &str) -> Result<String, String> {
    text.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|inner| !inner.contains('"'))
        .map(str::to_string)
        .ok_or_else(|| format!("expected a string literal, found '{text}'"))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Ident(String),
    Op(BinaryOp),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let literal = &text[start..end];
                let value = literal
                    .parse()
                    .map_err(|_| format!("integer literal '{literal}' is too large"))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Ident(text[start..end].to_string()));
            }
            _ => {
                let token = match c {
                    '+' => Token::Op(BinaryOp::Add),
                    '-' => Token::Op(BinaryOp::Sub),
                    '*' => Token::Op(BinaryOp::Mul),
                    '/' => Token::Op(BinaryOp::Div),
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => return Err(format!("unexpected character '{other}'")),
                };
                tokens.push(token);
                chars.next();
            }
        }
    }

    Ok(tokens)
}

fn parse_expr(text: &str) -> Result<Expr, String> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err("expected an expression".to_string());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected {token:?} after expression")),
    }
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, String> {
        let mut lhs = self.operand()?;
        while let Some(Token::Op(op)) = self.tokens.get(self.pos) {
            let op = *op;
            if op.precedence() <= min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(op.precedence())?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn operand(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::Op(BinaryOp::Sub)) => Ok(Expr::Neg(Box::new(self.operand()?))),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
