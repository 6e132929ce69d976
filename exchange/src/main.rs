//! Kantor Demo Binary
//!
//! Runs one scripted customer session against in-memory stores and prints
//! each service response as JSON on stdout. Logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kantor_common::Currency;
use kantor_exchange::messages::{
    CreateAccountRequest, HistoryRequest, LoginRequest, QuoteRequest, TopUpRequest, TradeRequest,
};
use kantor_exchange::{ExchangeConfig, ExchangeService, RateSource, ServiceResponse};
use kantor_fx::{FixedRateProvider, NbpRateProvider, RateProvider};

/// Kantor demo CLI
#[derive(Parser, Debug)]
#[command(name = "kantor-demo")]
#[command(about = "Scripted session against the Kantor exchange engine")]
struct Args {
    /// Rate source (nbp or fixed); overrides KANTOR_RATE_SOURCE
    #[arg(long)]
    rate_source: Option<RateSource>,

    /// Mid rate served by the fixed source
    #[arg(long, default_value = "4.00")]
    fixed_rate: Decimal,

    /// Currency to trade
    #[arg(short, long, default_value = "USD")]
    currency: String,

    /// PLN deposited before trading
    #[arg(long, default_value = "1000")]
    deposit: Decimal,

    /// Units to buy
    #[arg(long, default_value = "100")]
    buy: Decimal,

    /// Units to sell back
    #[arg(long, default_value = "50")]
    sell: Decimal,

    /// Rate lookup timeout in milliseconds; overrides KANTOR_RATE_TIMEOUT_MS
    #[arg(long)]
    rate_timeout_ms: Option<u64>,
}

fn print<T: Serialize>(step: &str, response: &ServiceResponse<T>) -> anyhow::Result<()> {
    if !response.is_success {
        error!(step, code = response.error_code().unwrap_or("UNKNOWN"), "Step failed");
    }
    println!("== {}\n{}", step, serde_json::to_string_pretty(response)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ExchangeConfig::from_env();
    if let Some(source) = args.rate_source {
        config.rate_source = source;
    }
    if let Some(ms) = args.rate_timeout_ms {
        config.rate_timeout = Duration::from_millis(ms);
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!(
        rate_source = %config.rate_source,
        buy_margin = %config.buy_margin,
        sell_margin = %config.sell_margin,
        "Starting Kantor demo"
    );

    let rates: Arc<dyn RateProvider> = match config.rate_source {
        RateSource::Nbp => Arc::new(NbpRateProvider::new(config.nbp_base_url.clone())?),
        RateSource::Fixed => Arc::new(
            FixedRateProvider::new("fixed").with_rate(Currency::new(&args.currency), args.fixed_rate),
        ),
    };
    let service = ExchangeService::in_memory(rates, &config)?;

    let created = service
        .create_account(CreateAccountRequest {
            username: "demo".to_string(),
            email: "demo@kantor.local".to_string(),
            password: "demo-password".to_string(),
        })
        .await;
    print("create_account", &created)?;
    let user_id = match created.data {
        Some(profile) => profile.id.to_string(),
        None => anyhow::bail!("could not create demo account: {}", created.message),
    };

    let login = service
        .authenticate(LoginRequest {
            username: "demo".to_string(),
            password: "demo-password".to_string(),
        })
        .await;
    print("authenticate", &login)?;

    let top_up = service
        .top_up(TopUpRequest {
            user_id: user_id.clone(),
            amount: args.deposit,
            reference: Some("demo-deposit".to_string()),
        })
        .await;
    print("top_up", &top_up)?;

    let quote = service
        .calculate_buy_price(QuoteRequest {
            currency: args.currency.clone(),
            amount: args.buy,
        })
        .await;
    print("calculate_buy_price", &quote)?;

    let bought = service
        .buy(TradeRequest {
            user_id: user_id.clone(),
            currency: args.currency.clone(),
            amount: args.buy,
        })
        .await;
    print("buy", &bought)?;

    let quote = service
        .calculate_sell_price(QuoteRequest {
            currency: args.currency.clone(),
            amount: args.sell,
        })
        .await;
    print("calculate_sell_price", &quote)?;

    let sold = service
        .sell(TradeRequest {
            user_id: user_id.clone(),
            currency: args.currency.clone(),
            amount: args.sell,
        })
        .await;
    print("sell", &sold)?;

    print("get_balance", &service.get_balance(&user_id).await)?;

    let history = service
        .get_transaction_history(HistoryRequest {
            user_id,
            page_size: 10,
            page_number: 1,
        })
        .await;
    print("get_transaction_history", &history)?;

    info!("Kantor demo complete");
    Ok(())
}
