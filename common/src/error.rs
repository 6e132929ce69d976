//! Error types for Kantor operations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Currency, TransactionId, UserId};

/// Main error type for ledger and trading operations.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// User account does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// User account exists but is deactivated.
    #[error("User account is inactive: {0}")]
    AccountInactive(UserId),

    /// Transaction does not exist.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Malformed or missing required field.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// Amount must be strictly positive.
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(Decimal),

    /// Username or email already registered.
    #[error("Username or email already exists")]
    DuplicateUser,

    /// Unknown username or wrong password.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Home-currency balance does not cover the debit.
    #[error("Insufficient PLN balance. Required: {required:.2} PLN, Available: {available:.2} PLN")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Currency position does not cover the sale.
    #[error("Insufficient {currency} balance. Required: {required}, Available: {available}")]
    InsufficientCurrencyBalance {
        currency: Currency,
        required: Decimal,
        available: Decimal,
    },

    /// Upstream rate source failed or returned no data.
    #[error("Unable to get exchange rate for {currency}: {reason}")]
    RateUnavailable { currency: Currency, reason: String },

    /// Internal invariant broken (e.g. identifier collision).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-checkable failure kind carried in service responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UserNotFound,
    AccountInactive,
    TransactionNotFound,
    InvalidInput,
    InvalidAmount,
    DuplicateUser,
    InvalidCredentials,
    InsufficientFunds,
    InsufficientCurrencyBalance,
    RateUnavailable,
    InvariantViolation,
    Internal,
}

impl ExchangeError {
    /// Shorthand for an input error tied to a field.
    pub fn invalid_input(message: impl Into<String>, field: impl Into<String>) -> Self {
        ExchangeError::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Amount that would overflow a balance or price.
    pub fn amount_out_of_range(amount: Decimal) -> Self {
        ExchangeError::invalid_input(format!("Amount {} is out of range", amount), "amount")
    }

    /// Get the failure kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::UserNotFound(_) => ErrorKind::UserNotFound,
            ExchangeError::AccountInactive(_) => ErrorKind::AccountInactive,
            ExchangeError::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            ExchangeError::InvalidInput { .. } => ErrorKind::InvalidInput,
            ExchangeError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            ExchangeError::DuplicateUser => ErrorKind::DuplicateUser,
            ExchangeError::InvalidCredentials => ErrorKind::InvalidCredentials,
            ExchangeError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            ExchangeError::InsufficientCurrencyBalance { .. } => {
                ErrorKind::InsufficientCurrencyBalance
            }
            ExchangeError::RateUnavailable { .. } => ErrorKind::RateUnavailable,
            ExchangeError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            ExchangeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is an internal fault rather than a rejected request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvariantViolation(_) | ExchangeError::Internal(_)
        )
    }

    /// Check if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::RateUnavailable { .. })
    }

    /// Get error code for responses.
    pub fn error_code(&self) -> &'static str {
        self.kind().code()
    }
}

impl ErrorKind {
    /// Stable code string.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UserNotFound => "USER_NOT_FOUND",
            ErrorKind::AccountInactive => "ACCOUNT_INACTIVE",
            ErrorKind::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::DuplicateUser => "DUPLICATE_USER",
            ErrorKind::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::InsufficientCurrencyBalance => "INSUFFICIENT_CURRENCY_BALANCE",
            ErrorKind::RateUnavailable => "RATE_UNAVAILABLE",
            ErrorKind::InvariantViolation => "INVARIANT_VIOLATION",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for Kantor operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
