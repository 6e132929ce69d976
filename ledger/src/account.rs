//! User account definitions for the ledger.

use chrono::{DateTime, Utc};
use kantor_common::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger account holder.
#[derive(Debug, Clone)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Login and display name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Stored credential (see `kantor-crypto`).
    pub password_hash: String,
    /// Home-currency balance; never negative.
    pub home_balance: Decimal,
    /// Whether the account may transact.
    pub is_active: bool,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new active user with a zero balance.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            home_balance: Decimal::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if account can transact.
    pub fn can_transact(&self) -> bool {
        self.is_active
    }

    /// Deactivate the account.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// Reactivate the account.
    pub fn activate(&mut self) {
        self.is_active = true;
        self.updated_at = Utc::now();
    }

    /// Snapshot without the credential.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            home_balance: self.home_balance,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

/// Public view of a user, safe to hand across the service boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub home_balance: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
