//! Append-only transaction journal.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kantor_common::{time, Currency, ExchangeError, Result, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Kind of journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// PLN deposit.
    TopUp,
    /// Foreign currency bought with PLN.
    Buy,
    /// Foreign currency sold for PLN.
    Sell,
}

impl TransactionKind {
    /// Upper-case label used in references.
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::TopUp => "TOPUP",
            TransactionKind::Buy => "BUY",
            TransactionKind::Sell => "SELL",
        }
    }
}

/// Outcome recorded with a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Completed,
    Failed,
}

/// An immutable journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID.
    pub id: TransactionId,
    /// Account owner.
    pub user_id: UserId,
    /// Operation kind.
    pub kind: TransactionKind,
    /// Traded currency (PLN for top-ups).
    pub currency: Currency,
    /// Units of `currency`.
    pub quantity: Decimal,
    /// Rate applied (1 for top-ups).
    pub rate: Decimal,
    /// PLN moved by the operation.
    pub home_amount: Decimal,
    /// When the operation completed.
    pub timestamp: DateTime<Utc>,
    /// Recorded outcome.
    pub status: TransactionStatus,
    /// Free-form reference.
    pub reference: String,
}

impl Transaction {
    /// Record a PLN top-up.
    pub fn top_up(user_id: UserId, amount: Decimal, reference: impl Into<String>) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            kind: TransactionKind::TopUp,
            currency: Currency::home(),
            quantity: amount,
            rate: Decimal::ONE,
            home_amount: amount,
            timestamp: time::now(),
            status: TransactionStatus::Completed,
            reference: reference.into(),
        }
    }

    /// Record a buy or sell; the reference is derived from kind, currency and time.
    pub fn trade(
        kind: TransactionKind,
        user_id: UserId,
        currency: Currency,
        quantity: Decimal,
        rate: Decimal,
        home_amount: Decimal,
    ) -> Self {
        let timestamp = time::now();
        let reference = format!(
            "{}-{}-{}",
            kind.label(),
            currency,
            time::reference_stamp(timestamp)
        );

        Self {
            id: TransactionId::new(),
            user_id,
            kind,
            currency,
            quantity,
            rate,
            home_amount,
            timestamp,
            status: TransactionStatus::Completed,
            reference,
        }
    }

    /// Change to the PLN balance caused by this transaction.
    pub fn home_delta(&self) -> Decimal {
        match self.kind {
            TransactionKind::TopUp | TransactionKind::Sell => self.home_amount,
            TransactionKind::Buy => -self.home_amount,
        }
    }
}

/// Requested page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Items per page (> 0).
    pub page_size: usize,
    /// One-based page number.
    pub page_number: usize,
}

impl PageRequest {
    /// Validate and build a page request.
    pub fn new(page_size: usize, page_number: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(ExchangeError::invalid_input(
                "Page size must be greater than zero",
                "page_size",
            ));
        }
        if page_number == 0 {
            return Err(ExchangeError::invalid_input(
                "Page number must be at least 1",
                "page_number",
            ));
        }
        Ok(Self {
            page_size,
            page_number,
        })
    }

    /// Number of items skipped before this page.
    pub fn offset(&self) -> usize {
        (self.page_number - 1).saturating_mul(self.page_size)
    }
}

/// One page of results plus the size of the full listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page_size: usize,
    pub page_number: usize,
}

impl<T> Page<T> {
    /// Number of pages needed for `total_count` items.
    pub fn total_pages(&self) -> usize {
        self.total_count.div_ceil(self.page_size.max(1))
    }
}

/// Append-only store of completed transactions.
#[async_trait]
pub trait TransactionJournal: Send + Sync {
    /// Append a transaction; its id must be fresh.
    async fn append(&self, transaction: Transaction) -> Result<()>;

    /// Look up a transaction.
    async fn get_by_id(&self, id: &TransactionId) -> Result<Transaction>;

    /// List a user's transactions, newest first.
    async fn list_for_user(&self, user_id: &UserId, page: PageRequest) -> Result<Page<Transaction>>;
}

#[derive(Debug, Clone)]
struct JournalRecord {
    sequence: u64,
    transaction: Transaction,
}

/// Journal held in memory.
#[derive(Default)]
pub struct InMemoryJournal {
    entries: DashMap<TransactionId, JournalRecord>,
    by_user: DashMap<UserId, Vec<TransactionId>>,
    sequence: AtomicU64,
}

impl InMemoryJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of journaled transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been journaled yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TransactionJournal for InMemoryJournal {
    async fn append(&self, transaction: Transaction) -> Result<()> {
        let id = transaction.id;
        let user_id = transaction.user_id;

        match self.entries.entry(id) {
            Entry::Occupied(_) => {
                error!(transaction_id = %id, "Transaction id collision");
                return Err(ExchangeError::InvariantViolation(format!(
                    "transaction id {} already journaled",
                    id
                )));
            }
            Entry::Vacant(slot) => {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                slot.insert(JournalRecord {
                    sequence,
                    transaction,
                });
            }
        }

        self.by_user.entry(user_id).or_default().push(id);

        debug!(transaction_id = %id, user_id = %user_id, "Transaction journaled");
        Ok(())
    }

    async fn get_by_id(&self, id: &TransactionId) -> Result<Transaction> {
        self.entries
            .get(id)
            .map(|r| r.transaction.clone())
            .ok_or(ExchangeError::TransactionNotFound(*id))
    }

    async fn list_for_user(&self, user_id: &UserId, page: PageRequest) -> Result<Page<Transaction>> {
        let ids = self
            .by_user
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let mut records: Vec<JournalRecord> = ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|r| r.clone()))
            .collect();

        records.sort_by(|a, b| {
            b.transaction
                .timestamp
                .cmp(&a.transaction.timestamp)
                .then(b.sequence.cmp(&a.sequence))
        });

        let total_count = records.len();
        let items = records
            .into_iter()
            .skip(page.offset())
            .take(page.page_size)
            .map(|r| r.transaction)
            .collect();

        Ok(Page {
            items,
            total_count,
            page_size: page.page_size,
            page_number: page.page_number,
        })
    }
}
