//! Ledger store: user accounts, home balances and currency positions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use kantor_common::{Currency, ExchangeError, Result, UserId};

use crate::account::User;
use crate::balance::{AccountBalance, CurrencyPosition};

/// Owner of all balance state.
///
/// Every operation is atomic for the user it touches. Composite sequences
/// (check, debit, adjust) are serialized by the caller.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Register a user; username and email must both be unused (exact match).
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User>;

    /// Get a user.
    async fn get_user(&self, id: &UserId) -> Result<User>;

    /// Find a user by exact username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Activate or deactivate a user.
    async fn set_active(&self, id: &UserId, active: bool) -> Result<User>;

    /// Get home balance and positions.
    async fn get_balance(&self, id: &UserId) -> Result<AccountBalance>;

    /// Add to the home balance; returns the new balance.
    async fn credit_home(&self, id: &UserId, amount: Decimal) -> Result<Decimal>;

    /// Take from the home balance; returns the new balance.
    async fn debit_home(&self, id: &UserId, amount: Decimal) -> Result<Decimal>;

    /// Buy (positive) or sell (negative) units of a currency; returns the new amount.
    async fn adjust_position(
        &self,
        id: &UserId,
        currency: &Currency,
        signed_amount: Decimal,
        trade_rate: Decimal,
    ) -> Result<Decimal>;

    /// Put home balance and positions back to an earlier snapshot.
    ///
    /// Used to compensate a half-applied trade; the caller must hold the
    /// user's lock since the snapshot was taken.
    async fn restore_balance(&self, snapshot: &AccountBalance) -> Result<()>;
}

#[derive(Debug, Clone)]
struct AccountRecord {
    user: User,
    positions: BTreeMap<Currency, CurrencyPosition>,
}

/// Ledger held in memory.
///
/// Each account lives in one `DashMap` entry, so an operation holds the
/// entry's shard lock for its whole read-check-write.
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: DashMap<UserId, AccountRecord>,
    usernames: DashMap<String, UserId>,
    emails: DashMap<String, UserId>,
    /// Serializes registrations so the two uniqueness indexes stay consistent.
    registration: Mutex<()>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.accounts.len()
    }

    fn with_account<T>(
        &self,
        id: &UserId,
        f: impl FnOnce(&mut AccountRecord) -> Result<T>,
    ) -> Result<T> {
        let mut record = self
            .accounts
            .get_mut(id)
            .ok_or(ExchangeError::UserNotFound(*id))?;
        f(&mut record)
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount(amount));
    }
    Ok(())
}

#[async_trait]
impl Ledger for InMemoryLedger {
    #[instrument(skip(self, password_hash))]
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let _guard = self.registration.lock();

        if self.usernames.contains_key(username) || self.emails.contains_key(email) {
            return Err(ExchangeError::DuplicateUser);
        }

        let user = User::new(username, email, password_hash);
        self.usernames.insert(user.username.clone(), user.id);
        self.emails.insert(user.email.clone(), user.id);
        self.accounts.insert(
            user.id,
            AccountRecord {
                user: user.clone(),
                positions: BTreeMap::new(),
            },
        );

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    async fn get_user(&self, id: &UserId) -> Result<User> {
        self.accounts
            .get(id)
            .map(|r| r.user.clone())
            .ok_or(ExchangeError::UserNotFound(*id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let id = match self.usernames.get(username) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&id).map(|r| r.user.clone()))
    }

    async fn set_active(&self, id: &UserId, active: bool) -> Result<User> {
        self.with_account(id, |record| {
            if active {
                record.user.activate();
            } else {
                record.user.deactivate();
            }
            Ok(record.user.clone())
        })
    }

    async fn get_balance(&self, id: &UserId) -> Result<AccountBalance> {
        let record = self
            .accounts
            .get(id)
            .ok_or(ExchangeError::UserNotFound(*id))?;

        Ok(AccountBalance {
            user_id: *id,
            home_balance: record.user.home_balance,
            positions: record.positions.values().cloned().collect(),
        })
    }

    #[instrument(skip(self))]
    async fn credit_home(&self, id: &UserId, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        self.with_account(id, |record| {
            record.user.home_balance = record
                .user
                .home_balance
                .checked_add(amount)
                .ok_or_else(|| ExchangeError::amount_out_of_range(amount))?;
            record.user.updated_at = chrono::Utc::now();
            debug!(balance = %record.user.home_balance, "Home balance credited");
            Ok(record.user.home_balance)
        })
    }

    #[instrument(skip(self))]
    async fn debit_home(&self, id: &UserId, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        self.with_account(id, |record| {
            if amount > record.user.home_balance {
                return Err(ExchangeError::InsufficientFunds {
                    required: amount,
                    available: record.user.home_balance,
                });
            }
            record.user.home_balance -= amount;
            record.user.updated_at = chrono::Utc::now();
            debug!(balance = %record.user.home_balance, "Home balance debited");
            Ok(record.user.home_balance)
        })
    }

    #[instrument(skip(self), fields(currency = %currency))]
    async fn adjust_position(
        &self,
        id: &UserId,
        currency: &Currency,
        signed_amount: Decimal,
        trade_rate: Decimal,
    ) -> Result<Decimal> {
        if signed_amount.is_zero() {
            return Err(ExchangeError::InvalidAmount(signed_amount));
        }

        self.with_account(id, |record| {
            if signed_amount > Decimal::ZERO {
                record
                    .positions
                    .entry(currency.clone())
                    .or_insert_with(|| CurrencyPosition::empty(currency.clone()))
                    .apply_buy(signed_amount, trade_rate)
            } else {
                match record.positions.get_mut(currency) {
                    Some(position) => position.apply_sell(-signed_amount),
                    None => Err(ExchangeError::InsufficientCurrencyBalance {
                        currency: currency.clone(),
                        required: -signed_amount,
                        available: Decimal::ZERO,
                    }),
                }
            }
        })
    }

    #[instrument(skip(self, snapshot), fields(user_id = %snapshot.user_id))]
    async fn restore_balance(&self, snapshot: &AccountBalance) -> Result<()> {
        if snapshot.home_balance < Decimal::ZERO {
            return Err(ExchangeError::InvariantViolation(format!(
                "snapshot for {} has negative home balance",
                snapshot.user_id
            )));
        }

        self.with_account(&snapshot.user_id, |record| {
            record.user.home_balance = snapshot.home_balance;
            record.user.updated_at = chrono::Utc::now();
            record.positions = snapshot
                .positions
                .iter()
                .map(|p| (p.currency.clone(), p.clone()))
                .collect();
            info!("Balance restored from snapshot");
            Ok(())
        })
    }
}
