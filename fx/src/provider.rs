//! Rate provider trait and the fixed in-process provider.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use kantor_common::{time, Currency};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Currencies quoted against PLN by the exchange office.
pub const SUPPORTED_CURRENCIES: [&str; 14] = [
    "USD", "EUR", "GBP", "CHF", "JPY", "CAD", "AUD", "SEK", "NOK", "DKK", "CZK", "HUF", "RUB",
    "UAH",
];

/// Check a currency against the supported list.
pub fn is_supported(currency: &Currency) -> bool {
    currency.is_well_formed() && SUPPORTED_CURRENCIES.contains(&currency.code())
}

/// Mid-market rate of one currency unit expressed in PLN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRate {
    /// Quoted currency.
    pub currency: Currency,
    /// Mid-market rate (PLN per unit).
    pub mid: Decimal,
    /// Date the rate applies to.
    pub effective_date: NaiveDate,
    /// Source table identifier (e.g. NBP table "A").
    pub table: String,
    /// Provider name.
    pub source: String,
}

/// Trait for reference rate sources.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Get the current rate for a currency.
    async fn fetch_rate(&self, currency: &Currency) -> FxResult<ReferenceRate>;

    /// Get the rate that was effective on a given date.
    async fn fetch_rate_on(&self, currency: &Currency, date: NaiveDate) -> FxResult<ReferenceRate>;

    /// Get current rates for every currency the source quotes.
    async fn fetch_all(&self) -> FxResult<Vec<ReferenceRate>>;

    /// Check if this provider quotes the given currency.
    fn supports(&self, currency: &Currency) -> bool {
        is_supported(currency)
    }
}

/// Provider serving rates held in memory.
///
/// Rates can be changed at runtime, and the provider can be told to fail or
/// to answer slowly, which makes it the default source for tests and for the
/// offline demo.
pub struct FixedRateProvider {
    name: String,
    rates: DashMap<Currency, Decimal>,
    effective_date: Mutex<NaiveDate>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FixedRateProvider {
    /// Create a new provider with no rates.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: DashMap::new(),
            effective_date: Mutex::new(time::today()),
            offline: AtomicBool::new(false),
            latency: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the mid rate for a currency.
    pub fn set_rate(&self, currency: Currency, mid: Decimal) {
        self.rates.insert(currency, mid);
    }

    /// Builder form of [`set_rate`](Self::set_rate).
    pub fn with_rate(self, currency: Currency, mid: Decimal) -> Self {
        self.set_rate(currency, mid);
        self
    }

    /// Remove the rate for a currency.
    pub fn clear_rate(&self, currency: &Currency) {
        self.rates.remove(currency);
    }

    /// Set the effective date reported for current rates.
    pub fn set_effective_date(&self, date: NaiveDate) {
        *self.effective_date.lock() = date;
    }

    /// Make every lookup fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every lookup by the given duration.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of lookups served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn lookup(&self, currency: &Currency, date: NaiveDate) -> FxResult<ReferenceRate> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FxError::ProviderError(format!("{} is offline", self.name)));
        }

        let mid = self
            .rates
            .get(currency)
            .map(|r| *r)
            .ok_or_else(|| FxError::RateNotAvailable(currency.clone()))?;

        debug!(provider = %self.name, currency = %currency, mid = %mid, "Serving fixed rate");

        Ok(ReferenceRate {
            currency: currency.clone(),
            mid,
            effective_date: date,
            table: "A".to_string(),
            source: self.name.clone(),
        })
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rate(&self, currency: &Currency) -> FxResult<ReferenceRate> {
        let date = *self.effective_date.lock();
        self.lookup(currency, date).await
    }

    async fn fetch_rate_on(&self, currency: &Currency, date: NaiveDate) -> FxResult<ReferenceRate> {
        if time::is_future_date(date) {
            return Err(FxError::FutureDate(date));
        }
        self.lookup(currency, date).await
    }

    async fn fetch_all(&self) -> FxResult<Vec<ReferenceRate>> {
        let mut currencies: Vec<Currency> = self.rates.iter().map(|r| r.key().clone()).collect();
        currencies.sort();

        let mut rates = Vec::with_capacity(currencies.len());
        for currency in currencies {
            rates.push(self.fetch_rate(&currency).await?);
        }
        Ok(rates)
    }

    fn supports(&self, currency: &Currency) -> bool {
        self.rates.contains_key(currency)
    }
}
