//! Time utilities for Kantor.

use chrono::{DateTime, NaiveDate, Utc};

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Format used in trade reference strings.
pub const REFERENCE_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Format of rate effective dates.
pub const EFFECTIVE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Get today's date.
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Check if a date lies after today.
pub fn is_future_date(date: NaiveDate) -> bool {
    date > today()
}

/// Compact stamp used in trade references, e.g. `20261019143005`.
pub fn reference_stamp(timestamp: Timestamp) -> String {
    timestamp.format(REFERENCE_STAMP_FORMAT).to_string()
}
