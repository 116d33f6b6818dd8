//! A small, closed expression language for KPI formulas.
//!
//! Formulas support numbers, strings, `None`/`True`/`False`, list literals,
//! arithmetic (`+ - * / % **`), comparisons (chainable), `and`/`or`/`not`,
//! conditionals (`a if cond else b`), attribute access, indexing and calls to the
//! aggregate functions `sum`, `min`, `max`, `avg` and `len`. Everything else a
//! formula references must be bound in the [`Environment`].
//!
//! Attribute access on a list of records projects the attribute over every row,
//! so `sum(invoices.amount)` totals a query that returned rows.

mod ast;
mod eval;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::{eval, Environment, BUILTIN_FUNCTIONS};
pub use parser::parse;

use crate::value::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    ZeroDivision,

    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    #[error("value error: {0}")]
    Value(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("'{type_name}' object has no attribute '{attribute}'")]
    Attribute {
        type_name: String,
        attribute: String,
    },

    #[error("index error: {0}")]
    Index(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },
}

/// How the KPI evaluator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Terminal numeric error, rendered as `#DIV/0`.
    DivisionByZero,
    /// May succeed once more names are bound.
    Unresolved,
    /// Terminal.
    Fatal,
}

impl EvalError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EvalError::ZeroDivision => ErrorClass::DivisionByZero,
            EvalError::UndefinedName(_) | EvalError::Value(_) => ErrorClass::Unresolved,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Parses and evaluates `source` in one go.
pub fn evaluate(source: &str, env: &Environment) -> Result<Value, EvalError> {
    let expr = parse(source)?;
    eval(&expr, env)
}
