//! Kantor Ledger
//!
//! Account balances, currency positions and the append-only transaction
//! journal. Both stores sit behind traits so the trading engine can run
//! against the in-memory implementations or a persistent one.

pub mod engine;
pub mod account;
pub mod journal;
pub mod balance;
pub mod projection;

pub use engine::{InMemoryLedger, Ledger};
pub use account::{User, UserProfile};
pub use journal::{
    InMemoryJournal, Page, PageRequest, Transaction, TransactionJournal, TransactionKind,
    TransactionStatus,
};
pub use balance::{AccountBalance, CurrencyPosition};
pub use projection::{replay_journal, BalanceProjection};
