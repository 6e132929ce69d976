//! Kantor Common Types
//!
//! This crate contains shared types used across the Kantor exchange office,
//! including identifiers, currency codes and the error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
