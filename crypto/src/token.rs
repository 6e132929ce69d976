//! Opaque session tokens.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::hash::{sha256_hex, to_hex};

/// Random bearer token handed out on authentication.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    /// Token length in bytes before hex encoding.
    pub const BYTES: usize = 32;

    /// Generate a new random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(to_hex(&bytes))
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix that identifies the token in logs.
    pub fn fingerprint(&self) -> String {
        let mut digest = sha256_hex(self.0.as_bytes());
        digest.truncate(12);
        digest
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Keep tokens out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(..)")
    }
}
