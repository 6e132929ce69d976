//! Exchange configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use kantor_fx::{FxResult, MarginPricer, NbpRateProvider};
use rust_decimal::Decimal;

/// Where reference rates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSource {
    /// Live NBP table A.
    Nbp,
    /// Fixed in-process rates.
    Fixed,
}

impl FromStr for RateSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nbp" => Ok(RateSource::Nbp),
            "fixed" => Ok(RateSource::Fixed),
            other => Err(format!("unknown rate source '{}' (expected nbp or fixed)", other)),
        }
    }
}

impl fmt::Display for RateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateSource::Nbp => write!(f, "nbp"),
            RateSource::Fixed => write!(f, "fixed"),
        }
    }
}

/// Main exchange configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Margin added to the reference rate when customers buy.
    pub buy_margin: Decimal,
    /// Margin taken off the reference rate when customers sell.
    pub sell_margin: Decimal,
    /// Upper bound on a single rate lookup.
    pub rate_timeout: Duration,
    /// Rate source.
    pub rate_source: RateSource,
    /// NBP API base URL.
    pub nbp_base_url: String,
    /// Log level.
    pub log_level: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            buy_margin: MarginPricer::standard_margin(),
            sell_margin: MarginPricer::standard_margin(),
            rate_timeout: Duration::from_secs(10),
            rate_source: RateSource::Nbp,
            nbp_base_url: NbpRateProvider::DEFAULT_BASE_URL.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ExchangeConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(margin) = std::env::var("KANTOR_BUY_MARGIN") {
            if let Ok(margin) = margin.parse() {
                config.buy_margin = margin;
            }
        }

        if let Ok(margin) = std::env::var("KANTOR_SELL_MARGIN") {
            if let Ok(margin) = margin.parse() {
                config.sell_margin = margin;
            }
        }

        if let Ok(ms) = std::env::var("KANTOR_RATE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.rate_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(source) = std::env::var("KANTOR_RATE_SOURCE") {
            if let Ok(source) = source.parse() {
                config.rate_source = source;
            }
        }

        if let Ok(url) = std::env::var("NBP_BASE_URL") {
            config.nbp_base_url = url;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.pricer().map_err(|e| e.to_string())?;

        if self.rate_timeout.is_zero() {
            return Err("Rate timeout cannot be 0".to_string());
        }

        if self.rate_source == RateSource::Nbp && self.nbp_base_url.is_empty() {
            return Err("NBP base URL cannot be empty".to_string());
        }

        Ok(())
    }

    /// Build the pricer for the configured margins.
    pub fn pricer(&self) -> FxResult<MarginPricer> {
        MarginPricer::new(self.buy_margin, self.sell_margin)
    }
}
