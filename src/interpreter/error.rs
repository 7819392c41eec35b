use thiserror::Error;

use crate::money::{Currency, MoneyError};

/// Runtime failures: unresolved references, operand domain violations, and
/// provider errors surfaced through the trace.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("undefined table '{name}'")]
    UndefinedTable { name: String },
    #[error("'{base}' does not qualify column '{column}' here")]
    UnresolvedColumn { base: String, column: String },
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },
    #[error("money amount overflow")]
    MoneyOverflow,
    #[error("expected a boolean condition, got {got}")]
    ExpectedBoolean { got: &'static str },
    #[error("cannot order {left} against {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },
    #[error("operator '{op}' cannot combine {left} and {right}")]
    InvalidOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("record for '{op}' is missing argument '{arg}'")]
    MalformedRecord { op: &'static str, arg: &'static str },
    #[error("{message}")]
    Provider { message: String },
}

impl From<MoneyError> for RuntimeError {
    fn from(error: MoneyError) -> Self {
        match error {
            MoneyError::CurrencyMismatch { left, right } => {
                RuntimeError::CurrencyMismatch { left, right }
            }
            MoneyError::Overflow => RuntimeError::MoneyOverflow,
        }
    }
}
