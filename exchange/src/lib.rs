//! Kantor Exchange
//!
//! The trading engine and its request/response boundary. The engine prices
//! trades from a [`kantor_fx::RateProvider`], applies them to a
//! [`kantor_ledger::Ledger`] under per-user locks and records every completed
//! operation in a [`kantor_ledger::TransactionJournal`].

pub mod config;
pub mod locks;
pub mod engine;
pub mod messages;
pub mod service;

pub use config::{ExchangeConfig, RateSource};
pub use locks::{UserLockGuard, UserLocks};
pub use engine::{TopUpOutcome, TradeOutcome, TradingEngine};
pub use messages::ServiceResponse;
pub use service::ExchangeService;
