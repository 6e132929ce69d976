//! Home balance and foreign currency positions.

use chrono::{DateTime, Utc};
use kantor_common::{Currency, ExchangeError, Result, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Holding of one foreign currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyPosition {
    /// Currency held.
    pub currency: Currency,
    /// Units held; never negative.
    pub amount: Decimal,
    /// Value-weighted mean acquisition rate (PLN per unit).
    pub average_rate: Decimal,
    /// When this position last changed.
    pub updated_at: DateTime<Utc>,
}

impl CurrencyPosition {
    /// Create an empty position.
    pub fn empty(currency: Currency) -> Self {
        Self {
            currency,
            amount: Decimal::ZERO,
            average_rate: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Add `amount` units acquired at `rate` and re-average.
    pub fn apply_buy(&mut self, amount: Decimal, rate: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(amount));
        }

        let out_of_range = || ExchangeError::amount_out_of_range(amount);
        let new_amount = self.amount.checked_add(amount).ok_or_else(out_of_range)?;
        let held_value = self
            .amount
            .checked_mul(self.average_rate)
            .ok_or_else(out_of_range)?;
        let bought_value = amount.checked_mul(rate).ok_or_else(out_of_range)?;
        let total_value = held_value.checked_add(bought_value).ok_or_else(out_of_range)?;

        self.average_rate = total_value / new_amount;
        self.amount = new_amount;
        self.updated_at = Utc::now();
        Ok(self.amount)
    }

    /// Remove `amount` units; the average rate is left unchanged.
    pub fn apply_sell(&mut self, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(amount));
        }
        if amount > self.amount {
            return Err(ExchangeError::InsufficientCurrencyBalance {
                currency: self.currency.clone(),
                required: amount,
                available: self.amount,
            });
        }

        self.amount -= amount;
        self.updated_at = Utc::now();
        Ok(self.amount)
    }

    /// Same holding, ignoring timestamps.
    pub fn same_holding(&self, other: &CurrencyPosition) -> bool {
        self.currency == other.currency
            && self.amount == other.amount
            && self.average_rate == other.average_rate
    }
}

/// Balance snapshot of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account owner.
    pub user_id: UserId,
    /// PLN balance.
    pub home_balance: Decimal,
    /// Foreign positions ordered by currency code.
    pub positions: Vec<CurrencyPosition>,
}

impl AccountBalance {
    /// Find the position in a currency.
    pub fn position(&self, currency: &Currency) -> Option<&CurrencyPosition> {
        self.positions.iter().find(|p| &p.currency == currency)
    }

    /// Units held in a currency (zero when never bought).
    pub fn amount_of(&self, currency: &Currency) -> Decimal {
        self.position(currency)
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO)
    }

    /// Check if the home balance covers a debit.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.home_balance >= amount
    }
}
