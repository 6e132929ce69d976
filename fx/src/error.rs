//! FX error types.

use chrono::NaiveDate;
use kantor_common::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by rate providers and the pricer.
#[derive(Debug, Error)]
pub enum FxError {
    /// Currency code is malformed or not quoted by the source.
    #[error("Invalid currency code or currency not supported: {0}")]
    UnsupportedCurrency(Currency),

    /// Source has no rate for the currency (or date).
    #[error("Currency rate not found for {0}")]
    RateNotAvailable(Currency),

    /// Historical lookups cannot target future dates.
    #[error("Cannot retrieve future exchange rates ({0})")]
    FutureDate(NaiveDate),

    /// Provider transport or decoding failure.
    #[error("Rate provider error: {0}")]
    ProviderError(String),

    /// Provider did not answer in time.
    #[error("Rate provider timed out after {0} ms")]
    Timeout(u64),

    /// Margin outside [0, 1).
    #[error("Invalid {side} margin {value}: must be in [0, 1)")]
    InvalidMargin { side: &'static str, value: Decimal },

    /// Price or total does not fit in a decimal.
    #[error("Amount {0} is too large to price")]
    AmountOutOfRange(Decimal),
}

impl From<reqwest::Error> for FxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FxError::ProviderError(format!("request timed out: {}", err))
        } else {
            FxError::ProviderError(err.to_string())
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
