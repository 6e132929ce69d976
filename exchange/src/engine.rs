//! Trading engine.
//!
//! Every operation runs validate, price, check, mutate, journal in one pass.
//! Rate lookups happen before the user's lock is taken; everything that
//! reads or writes the user's balance afterwards happens under it, and any
//! failure after the first ledger write restores the pre-trade snapshot.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use kantor_common::{time, Currency, ExchangeError, Result, TransactionId, UserId};
use kantor_fx::{FxError, FxResult, MarginPricer, Quote, RateProvider, ReferenceRate, TradeSide};
use kantor_ledger::{
    AccountBalance, Ledger, Page, PageRequest, Transaction, TransactionJournal, TransactionKind,
    User,
};

use crate::locks::UserLocks;

/// Result of an executed buy or sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    /// Journaled transaction.
    pub transaction: Transaction,
    /// Price the trade executed at.
    pub quote: Quote,
    /// PLN balance after the trade.
    pub new_home_balance: Decimal,
    /// Units of the traded currency held after the trade.
    pub new_currency_amount: Decimal,
}

/// Result of a top-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpOutcome {
    pub transaction: Transaction,
    pub new_home_balance: Decimal,
}

/// Orchestrates rate lookup, pricing, ledger mutation and journaling.
pub struct TradingEngine {
    ledger: Arc<dyn Ledger>,
    journal: Arc<dyn TransactionJournal>,
    rates: Arc<dyn RateProvider>,
    pricer: MarginPricer,
    rate_timeout: Duration,
    locks: UserLocks,
}

impl TradingEngine {
    /// Default upper bound on a rate lookup.
    pub const DEFAULT_RATE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a new engine.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        journal: Arc<dyn TransactionJournal>,
        rates: Arc<dyn RateProvider>,
        pricer: MarginPricer,
    ) -> Self {
        Self {
            ledger,
            journal,
            rates,
            pricer,
            rate_timeout: Self::DEFAULT_RATE_TIMEOUT,
            locks: UserLocks::new(),
        }
    }

    /// Override the rate lookup timeout.
    pub fn with_rate_timeout(mut self, rate_timeout: Duration) -> Self {
        self.rate_timeout = rate_timeout;
        self
    }

    /// Get the pricer.
    pub fn pricer(&self) -> &MarginPricer {
        &self.pricer
    }

    /// Get the ledger.
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Buy `amount` units of `currency` with PLN.
    #[instrument(skip(self), fields(user_id = %user_id, currency = %currency, amount = %amount))]
    pub async fn buy(
        &self,
        user_id: &UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<TradeOutcome> {
        ensure_positive(amount)?;
        ensure_tradeable(currency)?;
        self.active_user(user_id).await?;

        let reference = self.reference_rate(currency).await?;
        let quote = self.quote(TradeSide::Buy, &reference, amount)?;
        ensure_priced(&quote)?;

        let _guard = self.locks.acquire(user_id).await;
        self.active_user(user_id).await?;
        let before = self.ledger.get_balance(user_id).await?;

        if !before.has_sufficient_funds(quote.total) {
            warn!(
                required = %quote.total,
                available = %before.home_balance,
                "Buy rejected: insufficient funds"
            );
            return Err(ExchangeError::InsufficientFunds {
                required: quote.total,
                available: before.home_balance,
            });
        }

        let transaction = Transaction::trade(
            TransactionKind::Buy,
            *user_id,
            currency.clone(),
            amount,
            quote.rate,
            quote.total,
        );

        let (new_home_balance, new_currency_amount) = self
            .apply(&before, async {
                let home = self.ledger.debit_home(user_id, quote.total).await?;
                let held = self
                    .ledger
                    .adjust_position(user_id, currency, amount, quote.rate)
                    .await?;
                self.journal.append(transaction.clone()).await?;
                Ok::<_, ExchangeError>((home, held))
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            rate = %quote.rate,
            total = %quote.total,
            new_home_balance = %new_home_balance,
            "Buy completed"
        );

        Ok(TradeOutcome {
            transaction,
            quote,
            new_home_balance,
            new_currency_amount,
        })
    }

    /// Sell `amount` units of `currency` for PLN.
    #[instrument(skip(self), fields(user_id = %user_id, currency = %currency, amount = %amount))]
    pub async fn sell(
        &self,
        user_id: &UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<TradeOutcome> {
        ensure_positive(amount)?;
        ensure_tradeable(currency)?;
        self.active_user(user_id).await?;

        // Fail fast without a rate lookup; re-checked under the lock.
        let held = self.ledger.get_balance(user_id).await?.amount_of(currency);
        ensure_holding(currency, amount, held)?;

        let reference = self.reference_rate(currency).await?;
        let quote = self.quote(TradeSide::Sell, &reference, amount)?;
        ensure_priced(&quote)?;

        let _guard = self.locks.acquire(user_id).await;
        self.active_user(user_id).await?;
        let before = self.ledger.get_balance(user_id).await?;
        ensure_holding(currency, amount, before.amount_of(currency))?;

        let transaction = Transaction::trade(
            TransactionKind::Sell,
            *user_id,
            currency.clone(),
            amount,
            quote.rate,
            quote.total,
        );

        let (new_home_balance, new_currency_amount) = self
            .apply(&before, async {
                let home = self.ledger.credit_home(user_id, quote.total).await?;
                let held = self
                    .ledger
                    .adjust_position(user_id, currency, -amount, quote.rate)
                    .await?;
                self.journal.append(transaction.clone()).await?;
                Ok::<_, ExchangeError>((home, held))
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            rate = %quote.rate,
            total = %quote.total,
            new_home_balance = %new_home_balance,
            "Sell completed"
        );

        Ok(TradeOutcome {
            transaction,
            quote,
            new_home_balance,
            new_currency_amount,
        })
    }

    /// Deposit PLN. Without a reference, one is generated from the current time.
    #[instrument(skip(self), fields(user_id = %user_id, amount = %amount))]
    pub async fn top_up(
        &self,
        user_id: &UserId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<TopUpOutcome> {
        ensure_positive(amount)?;

        let reference = reference
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("TOPUP-{}", time::reference_stamp(time::now())));

        // Unknown ids never reach the lock table.
        self.active_user(user_id).await?;

        let _guard = self.locks.acquire(user_id).await;
        self.active_user(user_id).await?;
        let before = self.ledger.get_balance(user_id).await?;

        let transaction = Transaction::top_up(*user_id, amount, reference);

        let new_home_balance = self
            .apply(&before, async {
                let home = self.ledger.credit_home(user_id, amount).await?;
                self.journal.append(transaction.clone()).await?;
                Ok::<_, ExchangeError>(home)
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            new_home_balance = %new_home_balance,
            "Top-up completed"
        );

        Ok(TopUpOutcome {
            transaction,
            new_home_balance,
        })
    }

    /// Price a buy without executing it.
    pub async fn calculate_buy_price(&self, currency: &Currency, amount: Decimal) -> Result<Quote> {
        self.calculate_price(TradeSide::Buy, currency, amount).await
    }

    /// Price a sell without executing it.
    pub async fn calculate_sell_price(&self, currency: &Currency, amount: Decimal) -> Result<Quote> {
        self.calculate_price(TradeSide::Sell, currency, amount).await
    }

    #[instrument(skip(self), fields(side = side.label(), currency = %currency))]
    async fn calculate_price(
        &self,
        side: TradeSide,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<Quote> {
        ensure_positive(amount)?;
        ensure_tradeable(currency)?;

        let reference = self.reference_rate(currency).await?;
        self.quote(side, &reference, amount)
    }

    /// Get a user's balances. Waits for any in-flight trade of that user.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<AccountBalance> {
        self.ledger.get_user(user_id).await?;
        let _guard = self.locks.acquire(user_id).await;
        self.ledger.get_balance(user_id).await
    }

    /// List a user's transactions, newest first.
    pub async fn get_transaction_history(
        &self,
        user_id: &UserId,
        page_size: usize,
        page_number: usize,
    ) -> Result<Page<Transaction>> {
        self.ledger.get_user(user_id).await?;
        let page = PageRequest::new(page_size, page_number)?;
        self.journal.list_for_user(user_id, page).await
    }

    /// Look up one transaction.
    pub async fn get_transaction_details(&self, id: &TransactionId) -> Result<Transaction> {
        self.journal.get_by_id(id).await
    }

    /// Current mid-market rate for a currency.
    pub async fn get_current_rate(&self, currency: &Currency) -> Result<ReferenceRate> {
        ensure_tradeable(currency)?;
        self.reference_rate(currency).await
    }

    /// Current mid-market rates for every quoted currency.
    pub async fn get_all_current_rates(&self) -> Result<Vec<ReferenceRate>> {
        self.bounded(&Currency::home(), self.rates.fetch_all()).await
    }

    /// Mid-market rate effective on a past date.
    pub async fn get_historical_rate(
        &self,
        currency: &Currency,
        date: NaiveDate,
    ) -> Result<ReferenceRate> {
        ensure_tradeable(currency)?;
        if time::is_future_date(date) {
            return Err(ExchangeError::invalid_input(
                format!("Cannot retrieve future exchange rates ({})", date),
                "date",
            ));
        }
        self.bounded(currency, self.rates.fetch_rate_on(currency, date))
            .await
    }

    fn quote(&self, side: TradeSide, reference: &ReferenceRate, amount: Decimal) -> Result<Quote> {
        self.pricer.quote(side, reference, amount).map_err(|e| match e {
            FxError::AmountOutOfRange(_) => ExchangeError::amount_out_of_range(amount),
            other => ExchangeError::Internal(other.to_string()),
        })
    }

    async fn reference_rate(&self, currency: &Currency) -> Result<ReferenceRate> {
        self.bounded(currency, self.rates.fetch_rate(currency)).await
    }

    /// Run a provider call under the rate timeout, mapping any failure to
    /// `RateUnavailable`.
    async fn bounded<T>(
        &self,
        currency: &Currency,
        fetch: impl Future<Output = FxResult<T>>,
    ) -> Result<T> {
        let outcome = match tokio::time::timeout(self.rate_timeout, fetch).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FxError::Timeout(
                u64::try_from(self.rate_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        outcome.map_err(|e| {
            warn!(
                provider = self.rates.name(),
                currency = %currency,
                error = %e,
                "Rate lookup failed"
            );
            ExchangeError::RateUnavailable {
                currency: currency.clone(),
                reason: e.to_string(),
            }
        })
    }

    async fn active_user(&self, user_id: &UserId) -> Result<User> {
        let user = self.ledger.get_user(user_id).await?;
        if !user.can_transact() {
            return Err(ExchangeError::AccountInactive(*user_id));
        }
        Ok(user)
    }

    /// Run the ledger writes of one operation; an error or panic restores
    /// `snapshot` before returning.
    async fn apply<T>(
        &self,
        snapshot: &AccountBalance,
        writes: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let applied = AssertUnwindSafe(writes)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ExchangeError::Internal("ledger update panicked".to_string())));
        self.commit_or_roll_back(snapshot, applied).await
    }

    async fn commit_or_roll_back<T>(&self, snapshot: &AccountBalance, applied: Result<T>) -> Result<T> {
        match applied {
            Ok(value) => Ok(value),
            Err(cause) => {
                match self.ledger.restore_balance(snapshot).await {
                    Ok(()) => warn!(
                        user_id = %snapshot.user_id,
                        error = %cause,
                        "Operation failed; ledger rolled back"
                    ),
                    Err(e) => error!(
                        user_id = %snapshot.user_id,
                        error = %cause,
                        rollback_error = %e,
                        "Operation failed and ledger rollback failed"
                    ),
                }
                Err(cause)
            }
        }
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount(amount));
    }
    Ok(())
}

fn ensure_tradeable(currency: &Currency) -> Result<()> {
    if !currency.is_well_formed() {
        return Err(ExchangeError::invalid_input(
            format!("Invalid currency code '{}'", currency),
            "currency",
        ));
    }
    if currency.is_home() {
        return Err(ExchangeError::invalid_input(
            format!("{} is the home currency and cannot be traded", currency),
            "currency",
        ));
    }
    Ok(())
}

fn ensure_priced(quote: &Quote) -> Result<()> {
    if quote.total <= Decimal::ZERO {
        return Err(ExchangeError::invalid_input(
            format!(
                "{} {} is worth less than the smallest PLN unit",
                quote.amount, quote.currency
            ),
            "amount",
        ));
    }
    Ok(())
}

fn ensure_holding(currency: &Currency, required: Decimal, available: Decimal) -> Result<()> {
    if required > available {
        return Err(ExchangeError::InsufficientCurrencyBalance {
            currency: currency.clone(),
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use kantor_fx::FixedRateProvider;
    use kantor_ledger::{replay_journal, InMemoryJournal, InMemoryLedger};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    /// Journal whose appends can be switched to fail.
    #[derive(Default)]
    struct FlakyJournal {
        inner: InMemoryJournal,
        failing: AtomicBool,
        panicking: AtomicBool,
    }

    #[async_trait]
    impl TransactionJournal for FlakyJournal {
        async fn append(&self, transaction: Transaction) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ExchangeError::Internal("journal unavailable".to_string()));
            }
            if self.panicking.load(Ordering::SeqCst) {
                panic!("journal crashed");
            }
            self.inner.append(transaction).await
        }

        async fn get_by_id(&self, id: &TransactionId) -> Result<Transaction> {
            self.inner.get_by_id(id).await
        }

        async fn list_for_user(&self, user_id: &UserId, page: PageRequest) -> Result<Page<Transaction>> {
            self.inner.list_for_user(user_id, page).await
        }
    }

    struct Harness {
        engine: TradingEngine,
        ledger: Arc<InMemoryLedger>,
        journal: Arc<FlakyJournal>,
        rates: Arc<FixedRateProvider>,
        user_id: UserId,
    }

    async fn harness() -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let journal = Arc::new(FlakyJournal::default());
        let rates = Arc::new(
            FixedRateProvider::new("test")
                .with_rate(Currency::usd(), dec!(4.00))
                .with_rate(Currency::eur(), dec!(4.30)),
        );
        let engine = TradingEngine::new(
            ledger.clone(),
            journal.clone(),
            rates.clone(),
            MarginPricer::standard(),
        );
        let user = ledger
            .create_user("anna", "anna@example.com", "hash")
            .await
            .unwrap();

        Harness {
            engine,
            ledger,
            journal,
            rates,
            user_id: user.id,
        }
    }

    async fn funded(amount: Decimal) -> Harness {
        let h = harness().await;
        h.engine.top_up(&h.user_id, amount, None).await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_top_up_buy_sell_scenario() {
        let h = harness().await;
        let usd = Currency::usd();

        let top_up = h
            .engine
            .top_up(&h.user_id, dec!(1000), Some("wire-001".to_string()))
            .await
            .unwrap();
        assert_eq!(top_up.new_home_balance, dec!(1000.00));
        assert_eq!(top_up.transaction.reference, "wire-001");
        assert_eq!(top_up.transaction.currency, Currency::home());

        let buy = h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap();
        assert_eq!(buy.quote.rate, dec!(4.08));
        assert_eq!(buy.quote.total, dec!(408.00));
        assert_eq!(buy.new_home_balance, dec!(592.00));
        assert_eq!(buy.new_currency_amount, dec!(100));
        assert!(buy.transaction.reference.starts_with("BUY-USD-"));

        let sell = h.engine.sell(&h.user_id, &usd, dec!(50)).await.unwrap();
        assert_eq!(sell.quote.rate, dec!(3.92));
        assert_eq!(sell.quote.total, dec!(196.00));
        assert_eq!(sell.new_home_balance, dec!(788.00));
        assert!(sell.transaction.reference.starts_with("SELL-USD-"));

        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(balance.home_balance, dec!(788.00));
        let position = balance.position(&usd).unwrap();
        assert_eq!(position.amount, dec!(50));
        assert_eq!(position.average_rate, dec!(4.08));
    }

    #[tokio::test]
    async fn test_top_up_generates_reference() {
        let h = harness().await;

        let outcome = h.engine.top_up(&h.user_id, dec!(10), Some("  ".to_string())).await.unwrap();
        assert!(outcome.transaction.reference.starts_with("TOPUP-"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buys_cannot_double_spend() {
        let h = funded(dec!(408)).await;
        let engine = Arc::new(h.engine);
        let user_id = h.user_id;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.buy(&user_id, &Currency::usd(), dec!(100)).await })
            })
            .collect();

        let mut successes = 0;
        let mut rejections = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(ExchangeError::InsufficientFunds { required, available }) => {
                    assert_eq!(required, dec!(408.00));
                    assert_eq!(available, Decimal::ZERO);
                    rejections += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(rejections, 7);
        let balance = engine.get_balance(&user_id).await.unwrap();
        assert_eq!(balance.home_balance, Decimal::ZERO);
        assert_eq!(balance.amount_of(&Currency::usd()), dec!(100));
        assert_eq!(h.journal.inner.len(), 2);
    }

    #[tokio::test]
    async fn test_average_rate_over_buys_and_sells() {
        let h = funded(dec!(2000)).await;
        let usd = Currency::usd();

        h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap();
        h.rates.set_rate(usd.clone(), dec!(5.00));
        h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap();

        // (100 * 4.08 + 100 * 5.10) / 200
        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(balance.position(&usd).unwrap().average_rate, dec!(4.59));

        h.engine.sell(&h.user_id, &usd, dec!(150)).await.unwrap();
        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        let position = balance.position(&usd).unwrap();
        assert_eq!(position.amount, dec!(50));
        assert_eq!(position.average_rate, dec!(4.59));
    }

    #[tokio::test]
    async fn test_rate_failure_leaves_no_trace() {
        let h = funded(dec!(1000)).await;
        h.rates.set_offline(true);

        let err = h.engine.buy(&h.user_id, &Currency::usd(), dec!(10)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::RateUnavailable { ref currency, .. } if *currency == Currency::usd()));

        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(balance.home_balance, dec!(1000));
        assert!(balance.positions.is_empty());
        assert_eq!(h.journal.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_timeout_is_rate_unavailable() {
        let h = funded(dec!(1000)).await;
        let engine = h.engine.with_rate_timeout(Duration::from_millis(20));
        h.rates.set_latency(Some(Duration::from_millis(500)));

        let err = engine.buy(&h.user_id, &Currency::usd(), dec!(10)).await.unwrap_err();
        match err {
            ExchangeError::RateUnavailable { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.get_balance(&h.user_id).await.unwrap().home_balance, dec!(1000));
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let h = harness().await;
        for i in 0..7 {
            h.engine
                .top_up(&h.user_id, dec!(10), Some(format!("deposit-{i}")))
                .await
                .unwrap();
        }

        let page = h.engine.get_transaction_history(&h.user_id, 3, 3).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_count, 7);
        assert_eq!(page.items[0].reference, "deposit-0");

        let page = h.engine.get_transaction_history(&h.user_id, 3, 4).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 7);

        assert!(matches!(
            h.engine.get_transaction_history(&h.user_id, 0, 1).await,
            Err(ExchangeError::InvalidInput { .. })
        ));
        assert!(matches!(
            h.engine.get_transaction_history(&UserId::new(), 3, 1).await,
            Err(ExchangeError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quote_matches_execution() {
        let h = funded(dec!(1000)).await;
        let usd = Currency::usd();

        let quoted = h.engine.calculate_buy_price(&usd, dec!(123.45)).await.unwrap();
        assert_eq!(h.journal.inner.len(), 1);

        let executed = h.engine.buy(&h.user_id, &usd, dec!(123.45)).await.unwrap();
        assert_eq!(executed.quote.rate, quoted.rate);
        assert_eq!(executed.quote.total, quoted.total);

        let quoted = h.engine.calculate_sell_price(&usd, dec!(23.45)).await.unwrap();
        let executed = h.engine.sell(&h.user_id, &usd, dec!(23.45)).await.unwrap();
        assert_eq!(executed.quote.total, quoted.total);
    }

    #[tokio::test]
    async fn test_oversell_rejected() {
        let h = funded(dec!(1000)).await;
        let usd = Currency::usd();
        h.engine.buy(&h.user_id, &usd, dec!(10)).await.unwrap();
        let before = h.engine.get_balance(&h.user_id).await.unwrap();
        let lookups = h.rates.call_count();

        let err = h.engine.sell(&h.user_id, &usd, dec!(11)).await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InsufficientCurrencyBalance { required, available, .. }
                if required == dec!(11) && available == dec!(10)
        ));
        assert_eq!(h.rates.call_count(), lookups);

        let err = h.engine.sell(&h.user_id, &Currency::eur(), dec!(1)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientCurrencyBalance { .. }));

        let after = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(after.home_balance, before.home_balance);
        assert_eq!(after.amount_of(&usd), dec!(10));
        assert_eq!(h.journal.inner.len(), 2);
    }

    #[tokio::test]
    async fn test_buy_over_balance_reports_amounts() {
        let h = funded(dec!(100)).await;

        let err = h.engine.buy(&h.user_id, &Currency::usd(), dec!(100)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient PLN balance. Required: 408.00 PLN, Available: 100.00 PLN"
        );
    }

    #[tokio::test]
    async fn test_journal_failure_rolls_back() {
        let h = funded(dec!(1000)).await;
        let usd = Currency::usd();
        h.engine.buy(&h.user_id, &usd, dec!(10)).await.unwrap();
        h.journal.failing.store(true, Ordering::SeqCst);

        let err = h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Internal(_)));
        assert!(h.engine.top_up(&h.user_id, dec!(5), None).await.is_err());

        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(balance.home_balance, dec!(959.20));
        let position = balance.position(&usd).unwrap();
        assert_eq!(position.amount, dec!(10));
        assert_eq!(position.average_rate, dec!(4.08));
    }

    #[tokio::test]
    async fn test_panic_during_writes_rolls_back() {
        let h = funded(dec!(1000)).await;
        let usd = Currency::usd();
        h.journal.panicking.store(true, Ordering::SeqCst);

        let err = h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Internal(_)));

        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(balance.home_balance, dec!(1000));
        assert!(balance.position(&usd).is_none());

        h.journal.panicking.store(false, Ordering::SeqCst);
        h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_users_leave_no_locks() {
        let h = funded(dec!(1000)).await;

        for _ in 0..200 {
            assert!(matches!(
                h.engine.get_balance(&UserId::new()).await,
                Err(ExchangeError::UserNotFound(_))
            ));
            assert!(matches!(
                h.engine.top_up(&UserId::new(), dec!(1), None).await,
                Err(ExchangeError::UserNotFound(_))
            ));
        }
        h.engine.buy(&h.user_id, &Currency::usd(), dec!(1)).await.unwrap();
        h.engine.get_balance(&h.user_id).await.unwrap();

        assert!(h.engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_overflowing_amounts_are_rejected() {
        let h = funded(dec!(1000)).await;
        let usd = Currency::usd();

        let err = h
            .engine
            .calculate_buy_price(&usd, Decimal::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidInput { field: Some(ref f), .. } if f == "amount"));
        assert!(matches!(
            h.engine.buy(&h.user_id, &usd, Decimal::MAX).await,
            Err(ExchangeError::InvalidInput { .. })
        ));

        h.engine.top_up(&h.user_id, Decimal::MAX - dec!(1000), None).await.unwrap();
        let err = h.engine.top_up(&h.user_id, Decimal::MAX, None).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidInput { field: Some(ref f), .. } if f == "amount"));

        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert_eq!(balance.home_balance, Decimal::MAX);
        let history = h.engine.get_transaction_history(&h.user_id, 10, 1).await.unwrap();
        assert_eq!(history.total_count, 2);
    }

    #[tokio::test]
    async fn test_input_validation() {
        let h = funded(dec!(1000)).await;

        assert!(matches!(
            h.engine.buy(&h.user_id, &Currency::usd(), dec!(0)).await,
            Err(ExchangeError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.engine.sell(&h.user_id, &Currency::usd(), dec!(-1)).await,
            Err(ExchangeError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.engine.buy(&h.user_id, &Currency::new("US"), dec!(1)).await,
            Err(ExchangeError::InvalidInput { .. })
        ));
        assert!(matches!(
            h.engine.buy(&h.user_id, &Currency::home(), dec!(1)).await,
            Err(ExchangeError::InvalidInput { .. })
        ));
        assert!(matches!(
            h.engine.buy(&UserId::new(), &Currency::usd(), dec!(1)).await,
            Err(ExchangeError::UserNotFound(_))
        ));
        assert!(matches!(
            h.engine.top_up(&h.user_id, dec!(0), None).await,
            Err(ExchangeError::InvalidAmount(_))
        ));
        assert_eq!(h.rates.call_count(), 0);

        // Priced to less than one grosz.
        assert!(matches!(
            h.engine.buy(&h.user_id, &Currency::usd(), dec!(0.001)).await,
            Err(ExchangeError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_trade() {
        let h = funded(dec!(1000)).await;
        h.ledger.set_active(&h.user_id, false).await.unwrap();

        assert!(matches!(
            h.engine.buy(&h.user_id, &Currency::usd(), dec!(1)).await,
            Err(ExchangeError::AccountInactive(_))
        ));
        assert!(matches!(
            h.engine.top_up(&h.user_id, dec!(1), None).await,
            Err(ExchangeError::AccountInactive(_))
        ));
        assert_eq!(h.rates.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transaction_details() {
        let h = funded(dec!(1000)).await;
        let buy = h.engine.buy(&h.user_id, &Currency::eur(), dec!(10)).await.unwrap();

        let found = h.engine.get_transaction_details(&buy.transaction.id).await.unwrap();
        assert_eq!(found, buy.transaction);
        assert!(matches!(
            h.engine.get_transaction_details(&TransactionId::new()).await,
            Err(ExchangeError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_queries() {
        let h = harness().await;

        let current = h.engine.get_current_rate(&Currency::eur()).await.unwrap();
        assert_eq!(current.mid, dec!(4.30));

        let all = h.engine.get_all_current_rates().await.unwrap();
        let codes: Vec<&str> = all.iter().map(|r| r.currency.code()).collect();
        assert_eq!(codes, vec!["EUR", "USD"]);

        let date = time::today() - chrono::Duration::days(3);
        let historical = h.engine.get_historical_rate(&Currency::usd(), date).await.unwrap();
        assert_eq!(historical.effective_date, date);

        let tomorrow = time::today() + chrono::Duration::days(1);
        assert!(matches!(
            h.engine.get_historical_rate(&Currency::usd(), tomorrow).await,
            Err(ExchangeError::InvalidInput { .. })
        ));
        assert!(matches!(
            h.engine.get_current_rate(&Currency::gbp()).await,
            Err(ExchangeError::RateUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_journal_replay_matches_ledger() {
        let h = funded(dec!(3000)).await;
        let usd = Currency::usd();
        let eur = Currency::eur();

        h.engine.buy(&h.user_id, &usd, dec!(100)).await.unwrap();
        h.engine.buy(&h.user_id, &eur, dec!(200)).await.unwrap();
        h.rates.set_rate(usd.clone(), dec!(4.25));
        h.engine.buy(&h.user_id, &usd, dec!(33.33)).await.unwrap();
        h.engine.sell(&h.user_id, &eur, dec!(120)).await.unwrap();
        h.engine.top_up(&h.user_id, dec!(99.99), None).await.unwrap();

        let projection = replay_journal(h.journal.as_ref(), &h.user_id).await.unwrap();
        let balance = h.engine.get_balance(&h.user_id).await.unwrap();
        assert!(projection.matches(&balance));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_balances_are_conserved(
            ops in proptest::collection::vec((any::<bool>(), 1u32..400, 300u32..600), 1..20)
        ) {
            tokio_test::block_on(async {
                let h = funded(dec!(5000)).await;
                let usd = Currency::usd();
                let mut expected_home = dec!(5000);
                let mut expected_usd = Decimal::ZERO;

                for (is_buy, units, rate_cents) in ops {
                    h.rates.set_rate(usd.clone(), Decimal::new(i64::from(rate_cents), 2));
                    let amount = Decimal::from(units);

                    let result = if is_buy {
                        h.engine.buy(&h.user_id, &usd, amount).await
                    } else {
                        h.engine.sell(&h.user_id, &usd, amount).await
                    };

                    match result {
                        Ok(outcome) if is_buy => {
                            expected_home -= outcome.quote.total;
                            expected_usd += amount;
                        }
                        Ok(outcome) => {
                            expected_home += outcome.quote.total;
                            expected_usd -= amount;
                        }
                        Err(ExchangeError::InsufficientFunds { .. })
                        | Err(ExchangeError::InsufficientCurrencyBalance { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }

                    let balance = h.engine.get_balance(&h.user_id).await.unwrap();
                    assert_eq!(balance.home_balance, expected_home);
                    assert_eq!(balance.amount_of(&usd), expected_usd);
                    assert!(balance.home_balance >= Decimal::ZERO);
                    assert!(balance.amount_of(&usd) >= Decimal::ZERO);
                }
            });
        }
    }
}
