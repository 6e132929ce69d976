//! Request and response types of the service boundary.
//!
//! Identifiers arrive as strings so malformed ids surface as `InvalidInput`
//! rather than a transport decoding failure.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kantor_common::{ErrorKind, ExchangeError};
use kantor_crypto::SessionToken;
use kantor_ledger::UserProfile;

/// Message returned for internal failures; details go to the log only.
pub const INTERNAL_FAILURE_MESSAGE: &str = "An unexpected error occurred";

/// Uniform envelope for every service operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub is_success: bool,
    pub message: String,
    pub error_kind: Option<ErrorKind>,
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    /// Successful response carrying data.
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            is_success: true,
            message: message.into(),
            error_kind: None,
            data: Some(data),
        }
    }

    /// Failed response built from an error.
    pub fn failure(error: &ExchangeError) -> Self {
        let (message, kind) = if error.is_internal() {
            (INTERNAL_FAILURE_MESSAGE.to_string(), ErrorKind::Internal)
        } else {
            (error.to_string(), error.kind())
        };

        Self {
            is_success: false,
            message,
            error_kind: Some(kind),
            data: None,
        }
    }

    /// Stable error code, if failed.
    pub fn error_code(&self) -> Option<&'static str> {
        self.error_kind.map(|kind| kind.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Profile plus the session token issued on login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user: UserProfile,
    pub token: SessionToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpRequest {
    pub user_id: String,
    pub amount: Decimal,
    /// Transfer reference; generated when absent.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Buy or sell order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub user_id: String,
    pub currency: String,
    pub amount: Decimal,
}

/// Price request for a prospective trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub user_id: String,
    pub page_size: usize,
    pub page_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalRateRequest {
    pub currency: String,
    pub date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_failure_carries_kind_and_message() {
        let response: ServiceResponse<()> = ServiceResponse::failure(&ExchangeError::InsufficientFunds {
            required: dec!(408),
            available: dec!(100),
        });

        assert!(!response.is_success);
        assert_eq!(response.error_kind, Some(ErrorKind::InsufficientFunds));
        assert_eq!(response.error_code(), Some("INSUFFICIENT_FUNDS"));
        assert!(response.message.contains("Required: 408.00 PLN"));
    }

    #[test]
    fn test_internal_failure_is_generic() {
        let response: ServiceResponse<()> =
            ServiceResponse::failure(&ExchangeError::InvariantViolation("id collision".to_string()));

        assert_eq!(response.error_kind, Some(ErrorKind::Internal));
        assert_eq!(response.message, INTERNAL_FAILURE_MESSAGE);
    }

    #[test]
    fn test_top_up_reference_optional() {
        let request: TopUpRequest =
            serde_json::from_str(r#"{"user_id":"x","amount":"12.50"}"#).unwrap();
        assert_eq!(request.amount, dec!(12.50));
        assert!(request.reference.is_none());
    }
}
