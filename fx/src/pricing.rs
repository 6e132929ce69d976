//! Margin pricing on top of reference rates.

use chrono::NaiveDate;
use kantor_common::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FxError, FxResult};
use crate::provider::ReferenceRate;

/// Direction of a trade from the customer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    /// Customer buys foreign currency, pays PLN.
    Buy,
    /// Customer sells foreign currency, receives PLN.
    Sell,
}

impl TradeSide {
    /// Upper-case label used in references and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// A priced offer for a given amount of foreign currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Traded currency.
    pub currency: Currency,
    /// Trade direction.
    pub side: TradeSide,
    /// Mid-market rate the price was derived from.
    pub reference_rate: Decimal,
    /// Rate after margin (PLN per unit).
    pub rate: Decimal,
    /// Foreign currency amount.
    pub amount: Decimal,
    /// PLN total, rounded to PLN precision.
    pub total: Decimal,
    /// Effective date of the reference rate.
    pub effective_date: NaiveDate,
    /// Source table of the reference rate.
    pub table: String,
}

/// Applies fixed buy and sell margins to reference rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginPricer {
    buy_margin: Decimal,
    sell_margin: Decimal,
}

impl MarginPricer {
    /// Standard margin on both sides (2%).
    pub fn standard_margin() -> Decimal {
        Decimal::new(2, 2)
    }

    /// Create a pricer; each margin must lie in [0, 1).
    pub fn new(buy_margin: Decimal, sell_margin: Decimal) -> FxResult<Self> {
        Self::check_margin("buy", buy_margin)?;
        Self::check_margin("sell", sell_margin)?;
        Ok(Self {
            buy_margin,
            sell_margin,
        })
    }

    /// Pricer with the standard 2% margins.
    pub fn standard() -> Self {
        Self {
            buy_margin: Self::standard_margin(),
            sell_margin: Self::standard_margin(),
        }
    }

    fn check_margin(side: &'static str, value: Decimal) -> FxResult<()> {
        if value < Decimal::ZERO || value >= Decimal::ONE {
            return Err(FxError::InvalidMargin { side, value });
        }
        Ok(())
    }

    /// Buy margin.
    pub fn buy_margin(&self) -> Decimal {
        self.buy_margin
    }

    /// Sell margin.
    pub fn sell_margin(&self) -> Decimal {
        self.sell_margin
    }

    /// Apply the side's margin to a reference rate.
    pub fn price(&self, side: TradeSide, reference_rate: Decimal) -> FxResult<Decimal> {
        let factor = match side {
            TradeSide::Buy => Decimal::ONE + self.buy_margin,
            TradeSide::Sell => Decimal::ONE - self.sell_margin,
        };
        reference_rate
            .checked_mul(factor)
            .ok_or(FxError::AmountOutOfRange(reference_rate))
    }

    /// Price `amount` units of the reference currency.
    ///
    /// Both pre-trade quotes and executed trades go through here.
    pub fn quote(&self, side: TradeSide, reference: &ReferenceRate, amount: Decimal) -> FxResult<Quote> {
        let rate = self.price(side, reference.mid)?;
        let total = amount
            .checked_mul(rate)
            .map(|total| Currency::home().round(total))
            .ok_or(FxError::AmountOutOfRange(amount))?;

        Ok(Quote {
            currency: reference.currency.clone(),
            side,
            reference_rate: reference.mid,
            rate,
            amount,
            total,
            effective_date: reference.effective_date,
            table: reference.table.clone(),
        })
    }
}

impl Default for MarginPricer {
    fn default() -> Self {
        Self::standard()
    }
}
