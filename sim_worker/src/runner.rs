//! Script interpretation seam and a small integer interpreter

use ipc::Bindings;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Interprets scripts for one engine instance.
///
/// Errors are returned as the text the worker puts in its `EXCEPTION` reply.
pub trait ScriptRunner: Send {
    /// Runs `script` for its side effects
    fn execute(&mut self, script: &str) -> Result<(), String>;

    /// Runs `script` with `bindings` visible and returns its last value
    fn evaluate(&mut self, script: &str, bindings: &Bindings) -> Result<Value, String>;
}

/// Builds a fresh runner for each new engine instance
pub type RunnerFactory = Arc<dyn Fn() -> Box<dyn ScriptRunner> + Send + Sync>;

/// Factory for [`ArithmeticRunner`]s
pub fn arithmetic_factory() -> RunnerFactory {
    Arc::new(|| Box::new(ArithmeticRunner::new()) as Box<dyn ScriptRunner>)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("NameError: name '{0}' is not defined")]
    UnknownName(String),

    #[error("TypeError: binding '{0}' is not an integer")]
    NotInteger(String),

    #[error("ZeroDivisionError: division by zero")]
    DivisionByZero,

    #[error("OverflowError: integer overflow")]
    Overflow,

    /// Text of a `raise` statement
    #[error("{0}")]
    Raised(String),
}

/// Integer calculator with per-instance variables.
///
/// A script is a list of statements separated by `;` or newlines. Each
/// statement is one of:
///
/// - an expression over `+ - * /`, parentheses, unary minus, integer
///   literals and names
/// - `name = expr`, which stores the value for later scripts
/// - `return expr`
/// - `raise <text>`, which fails the script with `<text>`
/// - `sleep <ms>`, which blocks the worker
///
/// `#` starts a comment. The value of the last statement is the result.
#[derive(Debug, Default)]
pub struct ArithmeticRunner {
    globals: HashMap<String, i64>,
}

impl ArithmeticRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a stored variable
    pub fn global(&self, name: &str) -> Option<i64> {
        self.globals.get(name).copied()
    }

    fn run(&mut self, script: &str, bindings: &Bindings) -> Result<Option<i64>, EvalError> {
        let mut locals = HashMap::new();
        for (name, value) in bindings {
            let value = value
                .as_i64()
                .ok_or_else(|| EvalError::NotInteger(name.clone()))?;
            locals.insert(name.clone(), value);
        }

        let mut last = None;
        for line in script.lines() {
            let line = line.split('#').next().unwrap_or("");
            for statement in line.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                last = self.statement(statement, &mut locals)?;
                if keyword(statement, "return").is_some() {
                    return Ok(last);
                }
            }
        }
        Ok(last)
    }

    fn statement(
        &mut self,
        statement: &str,
        locals: &mut HashMap<String, i64>,
    ) -> Result<Option<i64>, EvalError> {
        if let Some(text) = keyword(statement, "raise") {
            return Err(EvalError::Raised(text.to_string()));
        }
        if let Some(ms) = keyword(statement, "sleep") {
            let ms = ms
                .parse::<u64>()
                .map_err(|_| EvalError::Syntax(format!("invalid sleep duration '{}'", ms)))?;
            thread::sleep(Duration::from_millis(ms));
            return Ok(None);
        }
        if let Some(expr) = keyword(statement, "return") {
            if expr.is_empty() {
                return Ok(None);
            }
            return self.expression(expr, locals).map(Some);
        }
        if let Some((name, expr)) = assignment(statement) {
            let value = self.expression(expr, locals)?;
            locals.remove(name);
            self.globals.insert(name.to_string(), value);
            return Ok(Some(value));
        }
        self.expression(statement, locals).map(Some)
    }

    fn expression(&self, text: &str, locals: &HashMap<String, i64>) -> Result<i64, EvalError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            lookup: &|name: &str| {
                locals
                    .get(name)
                    .or_else(|| self.globals.get(name))
                    .copied()
                    .ok_or_else(|| EvalError::UnknownName(name.to_string()))
            },
        };
        let value = parser.expr()?;
        match parser.peek() {
            None => Ok(value),
            Some(token) => Err(EvalError::Syntax(format!("unexpected '{}'", token))),
        }
    }
}

impl ScriptRunner for ArithmeticRunner {
    fn execute(&mut self, script: &str) -> Result<(), String> {
        self.run(script, &Bindings::new())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn evaluate(&mut self, script: &str, bindings: &Bindings) -> Result<Value, String> {
        match self.run(script, bindings) {
            Ok(Some(value)) => Ok(Value::from(value)),
            Ok(None) => Ok(Value::Null),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// `keyword rest` or a bare `keyword`
fn keyword<'a>(statement: &'a str, word: &str) -> Option<&'a str> {
    let rest = statement.strip_prefix(word)?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn assignment(statement: &str) -> Option<(&str, &str)> {
    let (name, expr) = statement.split_once('=')?;
    let name = name.trim();
    is_identifier(name).then_some((name, expr.trim()))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    Name(String),
    Op(char),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Name(name) => write!(f, "{}", name),
            Token::Op(op) => write!(f, "{}", op),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            let n = digits.parse().map_err(|_| EvalError::Overflow)?;
            tokens.push(Token::Number(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut name = String::new();
            while let Some(&d) = chars
                .peek()
                .filter(|d| d.is_ascii_alphanumeric() || **d == '_')
            {
                name.push(d);
                chars.next();
            }
            tokens.push(Token::Name(name));
        } else if "+-*/()".contains(c) {
            tokens.push(Token::Op(c));
            chars.next();
        } else {
            return Err(EvalError::Syntax(format!("invalid character '{}'", c)));
        }
    }

    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".to_string()));
    }
    Ok(tokens)
}

type Lookup<'a> = dyn Fn(&str) -> Result<i64, EvalError> + 'a;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    lookup: &'a Lookup<'a>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<i64, EvalError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value = value.checked_add(self.term()?).ok_or(EvalError::Overflow)?;
            } else if self.eat('-') {
                value = value.checked_sub(self.term()?).ok_or(EvalError::Overflow)?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<i64, EvalError> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value = value.checked_mul(self.unary()?).ok_or(EvalError::Overflow)?;
            } else if self.eat('/') {
                let divisor = self.unary()?;
                if divisor == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                value = value.checked_div(divisor).ok_or(EvalError::Overflow)?;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<i64, EvalError> {
        if self.eat('-') {
            return self.unary()?.checked_neg().ok_or(EvalError::Overflow);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, EvalError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Name(name)) => (self.lookup)(&name),
            Some(Token::Op('(')) => {
                let value = self.expr()?;
                if self.eat(')') {
                    Ok(value)
                } else {
                    Err(EvalError::Syntax("expected ')'".to_string()))
                }
            }
            Some(token) => Err(EvalError::Syntax(format!("unexpected '{}'", token))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_string())),
        }
    }
}
