//! Kantor FX
//!
//! Reference rate sources and margin pricing for the exchange office.
//!
//! # Features
//!
//! - Pluggable rate providers behind the [`RateProvider`] trait
//! - NBP table A client for live and historical mid-market rates
//! - Fixed in-process provider for tests and offline demos
//! - Buy/sell margin pricing shared by quoting and execution
//!
//! # Example
//!
//! ```rust,ignore
//! use kantor_fx::{FixedRateProvider, MarginPricer, RateProvider, TradeSide};
//! use kantor_common::Currency;
//!
//! let provider = FixedRateProvider::new("demo");
//! provider.set_rate(Currency::usd(), dec!(4.00));
//!
//! let reference = provider.fetch_rate(&Currency::usd()).await?;
//! let quote = MarginPricer::standard().quote(TradeSide::Buy, &reference, dec!(100))?;
//! assert_eq!(quote.total, dec!(408.00));
//! ```

pub mod provider;
pub mod nbp;
pub mod pricing;
pub mod error;

pub use provider::{FixedRateProvider, RateProvider, ReferenceRate, SUPPORTED_CURRENCIES};
pub use nbp::NbpRateProvider;
pub use pricing::{MarginPricer, Quote, TradeSide};
pub use error::{FxError, FxResult};
