//! National Bank of Poland (NBP) table A rate client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use kantor_common::{time, Currency};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::{is_supported, RateProvider, ReferenceRate};

/// Rate for a single currency (`/rates/a/{code}/`).
#[derive(Debug, Deserialize)]
struct NbpRateResponse {
    table: String,
    code: String,
    rates: Vec<NbpRate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbpRate {
    effective_date: NaiveDate,
    mid: Decimal,
}

/// Whole table (`/tables/a/`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbpTableResponse {
    table: String,
    effective_date: NaiveDate,
    rates: Vec<NbpCurrencyRate>,
}

#[derive(Debug, Deserialize)]
struct NbpCurrencyRate {
    code: String,
    mid: Decimal,
}

/// Client for the NBP exchange rate API.
pub struct NbpRateProvider {
    client: reqwest::Client,
    base_url: String,
}

impl NbpRateProvider {
    /// Public NBP endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.nbp.pl/api/exchangerates";

    /// HTTP timeout for a single request.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client against the given base URL.
    pub fn new(base_url: impl Into<String>) -> FxResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kantor/", env!("CARGO_PKG_VERSION")))
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client against the public endpoint.
    pub fn public() -> FxResult<Self> {
        Self::new(Self::DEFAULT_BASE_URL)
    }

    fn ensure_supported(currency: &Currency) -> FxResult<()> {
        if is_supported(currency) {
            Ok(())
        } else {
            Err(FxError::UnsupportedCurrency(currency.clone()))
        }
    }

    /// GET a JSON document; `None` when NBP answers 404 (no data for the request).
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> FxResult<Option<T>> {
        let url = format!("{}/{}?format=json", self.base_url, path);
        debug!(url = %url, "Requesting NBP rates");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.error_for_status()?.json::<T>().await?;
        Ok(Some(body))
    }

    async fn fetch_single(&self, currency: &Currency, path: String) -> FxResult<ReferenceRate> {
        match self.get_json::<NbpRateResponse>(&path).await {
            Ok(Some(response)) => rate_from_response(response),
            Ok(None) => Err(FxError::RateNotAvailable(currency.clone())),
            Err(e) => {
                warn!(currency = %currency, error = %e, "NBP request failed");
                Err(e)
            }
        }
    }
}

fn rate_from_response(response: NbpRateResponse) -> FxResult<ReferenceRate> {
    let currency = Currency::new(response.code);
    let rate = response
        .rates
        .into_iter()
        .next()
        .ok_or_else(|| FxError::RateNotAvailable(currency.clone()))?;

    Ok(ReferenceRate {
        currency,
        mid: rate.mid,
        effective_date: rate.effective_date,
        table: response.table,
        source: "NBP".to_string(),
    })
}

fn rates_from_table(table: NbpTableResponse) -> Vec<ReferenceRate> {
    table
        .rates
        .into_iter()
        .map(|rate| ReferenceRate {
            currency: Currency::new(rate.code),
            mid: rate.mid,
            effective_date: table.effective_date,
            table: table.table.clone(),
            source: "NBP".to_string(),
        })
        .collect()
}

#[async_trait]
impl RateProvider for NbpRateProvider {
    fn name(&self) -> &str {
        "NBP"
    }

    #[instrument(skip(self), fields(currency = %currency))]
    async fn fetch_rate(&self, currency: &Currency) -> FxResult<ReferenceRate> {
        Self::ensure_supported(currency)?;
        let path = format!("rates/a/{}/", currency.code().to_lowercase());
        self.fetch_single(currency, path).await
    }

    #[instrument(skip(self), fields(currency = %currency, date = %date))]
    async fn fetch_rate_on(&self, currency: &Currency, date: NaiveDate) -> FxResult<ReferenceRate> {
        Self::ensure_supported(currency)?;
        if time::is_future_date(date) {
            return Err(FxError::FutureDate(date));
        }
        let path = format!(
            "rates/a/{}/{}/",
            currency.code().to_lowercase(),
            date.format(time::EFFECTIVE_DATE_FORMAT)
        );
        self.fetch_single(currency, path).await
    }

    async fn fetch_all(&self) -> FxResult<Vec<ReferenceRate>> {
        let tables = self
            .get_json::<Vec<NbpTableResponse>>("tables/a/")
            .await?
            .unwrap_or_default();

        let table = tables.into_iter().next().ok_or_else(|| {
            FxError::ProviderError("Unable to retrieve current exchange rates".to_string())
        })?;

        Ok(rates_from_table(table))
    }
}
