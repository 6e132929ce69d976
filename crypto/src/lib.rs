//! Kantor Credential Primitives
//!
//! Provides password hashing, credential verification and session tokens.

pub mod hash;
pub mod credential;
pub mod token;

pub use hash::{sha256, sha256_hex};
pub use credential::{hash_password, verify_password};
pub use token::SessionToken;

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Empty password")]
    EmptyPassword,

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

impl From<argon2::password_hash::Error> for CryptoError {
    fn from(e: argon2::password_hash::Error) -> Self {
        CryptoError::Hashing(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
