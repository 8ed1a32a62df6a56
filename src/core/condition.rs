//! Guard expressions
//!
//! A small boolean language for job and step `if:` guards:
//!
//! ```text
//! success() && !contains(commit.message, '[ci skip]')
//! needs.build.result == 'failure' || matrix.os == "ubuntu"
//! ```
//!
//! Expressions are parsed once at load time and evaluated against an
//! [`EvalScope`] each time an instance or step is gated.

use crate::core::{
    context::RunContext,
    error::{ConditionError, SpecError},
    job::JobTemplate,
    matrix::{Matrix, MatrixCell},
    state::JobStatus,
    value::Value,
};
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "`{}`", s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::Dot => write!(f, "`.`"),
            Token::Comma => write!(f, "`,`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::And => write!(f, "`&&`"),
            Token::Or => write!(f, "`||`"),
            Token::Not => write!(f, "`!`"),
            Token::Eq => write!(f, "`==`"),
            Token::Ne => write!(f, "`!=`"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

fn syntax(position: usize, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
        position,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;

        match c {
            c if c.is_whitespace() => {
                pos += 1;
                continue;
            }
            '.' => {
                tokens.push((Token::Dot, start));
                pos += 1;
            }
            ',' => {
                tokens.push((Token::Comma, start));
                pos += 1;
            }
            '(' => {
                tokens.push((Token::LParen, start));
                pos += 1;
            }
            ')' => {
                tokens.push((Token::RParen, start));
                pos += 1;
            }
            '&' | '|' | '=' => {
                if chars.get(pos + 1) != Some(&c) {
                    return Err(syntax(start, format!("expected `{}{}`", c, c)));
                }
                let token = match c {
                    '&' => Token::And,
                    '|' => Token::Or,
                    _ => Token::Eq,
                };
                tokens.push((token, start));
                pos += 2;
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push((Token::Ne, start));
                    pos += 2;
                } else {
                    tokens.push((Token::Not, start));
                    pos += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                pos += 1;
                loop {
                    match chars.get(pos) {
                        None => return Err(syntax(start, "unterminated string")),
                        Some('\\') => {
                            match chars.get(pos + 1) {
                                Some(escaped) => value.push(*escaped),
                                None => return Err(syntax(start, "unterminated string")),
                            }
                            pos += 2;
                        }
                        Some(ch) if *ch == quote => {
                            pos += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            pos += 1;
                        }
                    }
                }
                tokens.push((Token::Str(value), start));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                if chars.get(pos) == Some(&'.')
                    && chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit())
                {
                    pos += 1;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| syntax(start, format!("invalid number `{}`", text)))?;
                tokens.push((Token::Number(number), start));
            }
            c if c.is_alphabetic() || c == '_' => {
                while pos < chars.len()
                    && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '-')
                {
                    pos += 1;
                }
                tokens.push((Token::Ident(chars[start..pos].iter().collect()), start));
            }
            other => return Err(syntax(start, format!("unexpected character `{}`", other))),
        }
    }

    tokens.push((Token::Eof, chars.len()));
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Reference(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        negated: bool,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Name and arity of every built-in function
const FUNCTIONS: &[(&str, usize)] = &[
    ("success", 0),
    ("failure", 0),
    ("cancelled", 0),
    ("always", 0),
    ("contains", 2),
    ("startsWith", 2),
    ("endsWith", 2),
    ("matches", 2),
];

/// Functions that read job or step status
const STATUS_FUNCTIONS: &[&str] = &["success", "failure", "cancelled", "always"];

/// Deepest nesting of parentheses, negations, calls and operator chains
const MAX_DEPTH: usize = 64;

impl Expr {
    fn checks_status(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Reference(_) => false,
            Expr::Call { name, args } => {
                STATUS_FUNCTIONS.contains(&name.as_str()) || args.iter().any(Expr::checks_status)
            }
            Expr::Not(inner) => inner.checks_status(),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.checks_status() || right.checks_status()
            }
            Expr::Compare { left, right, .. } => left.checks_status() || right.checks_status(),
        }
    }
}

/// Recursive descent parser, lowest precedence first
struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(syntax(
                self.position(),
                format!("expected {}, found {}", expected, self.peek()),
            ))
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax(
                self.position(),
                format!("expression nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        Ok(())
    }

    fn parse(mut self) -> Result<Expr, ConditionError> {
        let expr = self.parse_or()?;
        if *self.peek() != Token::Eof {
            return Err(syntax(
                self.position(),
                format!("unexpected {}", self.peek()),
            ));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        while *self.peek() == Token::And {
            self.advance();
            self.descend()?;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if *self.peek() == Token::Not {
            self.advance();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_primary()?;
        let negated = match self.peek() {
            Token::Eq => false,
            Token::Ne => true,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;
        Ok(Expr::Compare {
            negated,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let position = self.position();
        match self.advance() {
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Number(n) => Ok(Expr::Literal(Value::Float(n))),
            Token::LParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    return self.parse_call(name);
                }
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                if JobStatus::parse(&name).is_some() {
                    return Ok(Expr::Literal(Value::String(name)));
                }

                let mut parts = vec![name];
                while *self.peek() == Token::Dot {
                    self.advance();
                    match self.advance() {
                        Token::Ident(part) => parts.push(part),
                        other => {
                            return Err(syntax(
                                self.position(),
                                format!("expected a property name, found {}", other),
                            ))
                        }
                    }
                }
                Ok(Expr::Reference(parts))
            }
            other => Err(syntax(position, format!("unexpected {}", other))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ConditionError> {
        self.expect(Token::LParen)?;
        self.descend()?;
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.parse_or()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        self.depth -= 1;

        let (_, expected) = FUNCTIONS
            .iter()
            .find(|(f, _)| *f == name)
            .ok_or_else(|| ConditionError::UnknownFunction(name.clone()))?;
        if args.len() != *expected {
            return Err(ConditionError::Arity {
                name,
                expected: *expected,
                actual: args.len(),
            });
        }

        Ok(Expr::Call { name, args })
    }
}

/// Step-level state visible to step guards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepScope {
    /// Whether an earlier step of the same attempt failed
    pub failed: bool,
}

/// Everything a guard may look at
#[derive(Debug, Clone, Copy)]
pub struct EvalScope<'a> {
    pub context: &'a RunContext,
    pub needs: &'a [String],
    pub matrix: Option<&'a Matrix>,
    pub cell: Option<&'a MatrixCell>,
    pub step: Option<StepScope>,
}

impl<'a> EvalScope<'a> {
    /// Scope with only run-level references
    pub fn new(context: &'a RunContext) -> Self {
        Self {
            context,
            needs: &[],
            matrix: None,
            cell: None,
            step: None,
        }
    }

    /// Scope of one instance of `template`
    pub fn for_job(context: &'a RunContext, template: &'a JobTemplate, cell: &'a MatrixCell) -> Self {
        Self {
            context,
            needs: &template.needs,
            matrix: Some(&template.matrix),
            cell: Some(cell),
            step: None,
        }
    }

    /// Narrow a job scope to a step
    pub fn with_step(mut self, step: StepScope) -> Self {
        self.step = Some(step);
        self
    }

    fn need_status(&self, job: &str) -> Option<JobStatus> {
        if !self.needs.iter().any(|n| n == job) {
            return None;
        }
        self.context.result(job)
    }

    fn resolve(&self, parts: &[String]) -> Result<Value, ConditionError> {
        let undefined = || ConditionError::UndefinedReference(parts.join("."));
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();

        let value = match parts.as_slice() {
            ["event"] => Value::from(self.context.event.as_str()),
            ["actor"] => Value::from(self.context.actor.as_str()),
            ["commit", "message"] => Value::from(self.context.commit.message.as_str()),
            ["commit", "sha"] => Value::from(self.context.commit.sha.as_str()),
            ["commit", "branch"] => Value::from(self.context.commit.branch.as_str()),
            ["vars", name] => self.context.variable(name).cloned().ok_or_else(undefined)?,
            ["matrix", key] => {
                match self.cell.and_then(|cell| cell.get(key)) {
                    Some(value) => value.clone(),
                    // Declared axes left unset by an include-only cell
                    None if self.matrix.is_some_and(|m| m.is_axis(key)) => Value::Null,
                    None => return Err(undefined()),
                }
            }
            ["needs", job] | ["needs", job, "result"] => {
                let status = self.need_status(job).ok_or_else(undefined)?;
                Value::from(status.as_str())
            }
            [job] => {
                let status = self.need_status(job).ok_or_else(undefined)?;
                Value::from(status.as_str())
            }
            _ => return Err(undefined()),
        };

        Ok(value)
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value, ConditionError> {
        let result = match name {
            "always" => true,
            "cancelled" => self.context.cancel_requested,
            "success" => match self.step {
                Some(step) => !step.failed && !self.context.cancel_requested,
                None => {
                    !self.context.cancel_requested
                        && self
                            .needs
                            .iter()
                            .all(|n| self.context.result(n) == Some(JobStatus::Success))
                }
            },
            "failure" => match self.step {
                Some(step) => step.failed,
                None => self
                    .needs
                    .iter()
                    .any(|n| self.context.result(n) == Some(JobStatus::Failure)),
            },
            "contains" | "startsWith" | "endsWith" | "matches" => {
                let [haystack, needle] = args else {
                    return Err(ConditionError::Arity {
                        name: name.to_string(),
                        expected: 2,
                        actual: args.len(),
                    });
                };
                let haystack = text(&self.eval(haystack)?);
                let needle = text(&self.eval(needle)?);
                match name {
                    "contains" => haystack.contains(&needle),
                    "startsWith" => haystack.starts_with(&needle),
                    "endsWith" => haystack.ends_with(&needle),
                    _ => {
                        let regex = Regex::new(&needle).map_err(|e| ConditionError::InvalidRegex {
                            pattern: needle.clone(),
                            message: e.to_string(),
                        })?;
                        regex.is_match(&haystack)
                    }
                }
            }
            other => return Err(ConditionError::UnknownFunction(other.to_string())),
        };

        Ok(Value::Bool(result))
    }

    fn eval(&self, expr: &Expr) -> Result<Value, ConditionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Reference(parts) => self.resolve(parts),
            Expr::Call { name, args } => self.call(name, args),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::And(left, right) => {
                if !self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            Expr::Or(left, right) => {
                if self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            Expr::Compare {
                negated,
                left,
                right,
            } => {
                let equal = self.eval(left)?.loose_eq(&self.eval(right)?);
                Ok(Value::Bool(equal != *negated))
            }
        }
    }
}

/// String view used by the string functions; null reads as empty
fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A parsed guard expression
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
    checks_status: bool,
}

impl Condition {
    /// Parse a guard expression
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let expr = Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
        .parse()?;
        Ok(Self {
            source: source.to_string(),
            checks_status: expr.checks_status(),
            expr,
        })
    }

    /// Parse a guard of `job`, reporting failures as load errors
    pub fn parse_for(job: &str, source: &str) -> Result<Self, SpecError> {
        Self::parse(source).map_err(|source_err| SpecError::InvalidCondition {
            job: job.to_string(),
            expression: source.to_string(),
            source: source_err,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the guard calls `success()`, `failure()`, `cancelled()` or
    /// `always()`. Guards that don't are gated on success first.
    pub fn checks_status(&self) -> bool {
        self.checks_status
    }

    pub fn evaluate(&self, scope: &EvalScope<'_>) -> Result<bool, ConditionError> {
        Ok(scope.eval(&self.expr)?.is_truthy())
    }
}

/// Parse and evaluate in one go
pub fn evaluate(expression: &str, scope: &EvalScope<'_>) -> Result<bool, ConditionError> {
    Condition::parse(expression)?.evaluate(scope)
}
