//! Transport-agnostic service boundary.
//!
//! Every operation returns a [`ServiceResponse`]. Errors and panics raised
//! while serving a request are turned into failed responses here and never
//! propagate to the caller.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, instrument};

use kantor_common::{Currency, ExchangeError, Result, TransactionId, UserId};
use kantor_fx::{FxResult, Quote, RateProvider, ReferenceRate};
use kantor_ledger::{
    AccountBalance, InMemoryJournal, InMemoryLedger, Page, Transaction, UserProfile,
};

use crate::config::ExchangeConfig;
use crate::engine::{TopUpOutcome, TradeOutcome, TradingEngine};
use crate::messages::{
    AuthenticatedUser, CreateAccountRequest, HistoricalRateRequest, HistoryRequest, LoginRequest,
    QuoteRequest, ServiceResponse, TopUpRequest, TradeRequest,
};

/// Account, trading and rate operations behind one request/response API.
pub struct ExchangeService {
    engine: TradingEngine,
}

impl ExchangeService {
    /// Wrap an engine.
    pub fn new(engine: TradingEngine) -> Self {
        Self { engine }
    }

    /// Service over fresh in-memory stores.
    pub fn in_memory(rates: Arc<dyn RateProvider>, config: &ExchangeConfig) -> FxResult<Self> {
        let engine = TradingEngine::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryJournal::new()),
            rates,
            config.pricer()?,
        )
        .with_rate_timeout(config.rate_timeout);

        Ok(Self::new(engine))
    }

    /// Get the engine.
    pub fn engine(&self) -> &TradingEngine {
        &self.engine
    }

    /// Register a new user.
    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn create_account(
        &self,
        request: CreateAccountRequest,
    ) -> ServiceResponse<UserProfile> {
        respond(
            "create_account",
            async {
                validate_registration(&request)?;
                let password_hash = kantor_crypto::hash_password(&request.password)
                    .map_err(|e| ExchangeError::Internal(e.to_string()))?;
                let user = self
                    .engine
                    .ledger()
                    .create_user(&request.username, &request.email, &password_hash)
                    .await?;
                Ok::<_, ExchangeError>(user.profile())
            },
            |_| "Account created successfully".to_string(),
        )
        .await
    }

    /// Check credentials and issue a session token.
    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn authenticate(&self, request: LoginRequest) -> ServiceResponse<AuthenticatedUser> {
        respond(
            "authenticate",
            async {
                let user = self
                    .engine
                    .ledger()
                    .find_by_username(&request.username)
                    .await?
                    .ok_or(ExchangeError::InvalidCredentials)?;

                let verified = kantor_crypto::verify_password(&request.password, &user.password_hash)
                    .map_err(|e| ExchangeError::Internal(e.to_string()))?;
                if !verified {
                    return Err(ExchangeError::InvalidCredentials);
                }
                if !user.can_transact() {
                    return Err(ExchangeError::AccountInactive(user.id));
                }

                let token = kantor_crypto::SessionToken::generate();
                info!(user_id = %user.id, token = %token.fingerprint(), "User authenticated");
                Ok(AuthenticatedUser {
                    user: user.profile(),
                    token,
                })
            },
            |_| "Authentication successful".to_string(),
        )
        .await
    }

    /// Get a user's public profile.
    pub async fn get_user_profile(&self, user_id: &str) -> ServiceResponse<UserProfile> {
        respond(
            "get_user_profile",
            async {
                let user_id = parse_user_id(user_id)?;
                Ok::<_, ExchangeError>(self.engine.ledger().get_user(&user_id).await?.profile())
            },
            |_| "User retrieved successfully".to_string(),
        )
        .await
    }

    /// Deposit PLN.
    pub async fn top_up(&self, request: TopUpRequest) -> ServiceResponse<TopUpOutcome> {
        respond(
            "top_up",
            async {
                let user_id = parse_user_id(&request.user_id)?;
                self.engine
                    .top_up(&user_id, request.amount, request.reference.clone())
                    .await
            },
            |_| "Account topped up successfully".to_string(),
        )
        .await
    }

    /// Get PLN balance and currency positions.
    pub async fn get_balance(&self, user_id: &str) -> ServiceResponse<AccountBalance> {
        respond(
            "get_balance",
            async {
                let user_id = parse_user_id(user_id)?;
                self.engine.get_balance(&user_id).await
            },
            |_| "Balance retrieved successfully".to_string(),
        )
        .await
    }

    /// Buy foreign currency.
    pub async fn buy(&self, request: TradeRequest) -> ServiceResponse<TradeOutcome> {
        respond(
            "buy",
            async {
                let user_id = parse_user_id(&request.user_id)?;
                let currency = Currency::new(&request.currency);
                self.engine.buy(&user_id, &currency, request.amount).await
            },
            |_| "Currency purchased successfully".to_string(),
        )
        .await
    }

    /// Sell foreign currency.
    pub async fn sell(&self, request: TradeRequest) -> ServiceResponse<TradeOutcome> {
        respond(
            "sell",
            async {
                let user_id = parse_user_id(&request.user_id)?;
                let currency = Currency::new(&request.currency);
                self.engine.sell(&user_id, &currency, request.amount).await
            },
            |_| "Currency sold successfully".to_string(),
        )
        .await
    }

    /// Price a prospective buy.
    pub async fn calculate_buy_price(&self, request: QuoteRequest) -> ServiceResponse<Quote> {
        respond(
            "calculate_buy_price",
            async {
                let currency = Currency::new(&request.currency);
                self.engine.calculate_buy_price(&currency, request.amount).await
            },
            |q: &Quote| format!("Total cost: {:.2} PLN for {} {}", q.total, q.amount, q.currency),
        )
        .await
    }

    /// Price a prospective sell.
    pub async fn calculate_sell_price(&self, request: QuoteRequest) -> ServiceResponse<Quote> {
        respond(
            "calculate_sell_price",
            async {
                let currency = Currency::new(&request.currency);
                self.engine.calculate_sell_price(&currency, request.amount).await
            },
            |q: &Quote| format!("Total value: {:.2} PLN for {} {}", q.total, q.amount, q.currency),
        )
        .await
    }

    /// Page through a user's transactions, newest first.
    pub async fn get_transaction_history(
        &self,
        request: HistoryRequest,
    ) -> ServiceResponse<Page<Transaction>> {
        respond(
            "get_transaction_history",
            async {
                let user_id = parse_user_id(&request.user_id)?;
                self.engine
                    .get_transaction_history(&user_id, request.page_size, request.page_number)
                    .await
            },
            |page: &Page<Transaction>| format!("Retrieved {} of {} transactions", page.items.len(), page.total_count),
        )
        .await
    }

    /// Look up one transaction.
    pub async fn get_transaction_details(&self, transaction_id: &str) -> ServiceResponse<Transaction> {
        respond(
            "get_transaction_details",
            async {
                let id = TransactionId::parse(transaction_id.trim()).map_err(|_| {
                    ExchangeError::invalid_input(
                        format!("Invalid transaction id '{}'", transaction_id),
                        "transaction_id",
                    )
                })?;
                self.engine.get_transaction_details(&id).await
            },
            |_| "Transaction retrieved successfully".to_string(),
        )
        .await
    }

    /// Current mid-market rate.
    pub async fn get_current_rate(&self, currency: &str) -> ServiceResponse<ReferenceRate> {
        respond(
            "get_current_rate",
            async {
                self.engine
                    .get_current_rate(&Currency::new(currency))
                    .await
            },
            |r: &ReferenceRate| format!("Rate for {} effective {}", r.currency, r.effective_date),
        )
        .await
    }

    /// Current mid-market rates for all quoted currencies.
    pub async fn get_all_current_rates(&self) -> ServiceResponse<Vec<ReferenceRate>> {
        respond(
            "get_all_current_rates",
            self.engine.get_all_current_rates(),
            |rates: &Vec<ReferenceRate>| format!("Retrieved {} rates", rates.len()),
        )
        .await
    }

    /// Mid-market rate effective on a past date.
    pub async fn get_historical_rate(
        &self,
        request: HistoricalRateRequest,
    ) -> ServiceResponse<ReferenceRate> {
        respond(
            "get_historical_rate",
            async {
                self.engine
                    .get_historical_rate(&Currency::new(&request.currency), request.date)
                    .await
            },
            |r: &ReferenceRate| format!("Rate for {} effective {}", r.currency, r.effective_date),
        )
        .await
    }
}

/// Run an operation, converting its error or panic into a failed response.
async fn respond<T, F>(
    operation: &'static str,
    work: F,
    message: impl FnOnce(&T) -> String,
) -> ServiceResponse<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(data)) => ServiceResponse::success(message(&data), data),
        Ok(Err(err)) if err.is_internal() => {
            error!(operation, code = err.error_code(), error = %err, "Operation failed");
            ServiceResponse::failure(&err)
        }
        Ok(Err(err)) => {
            debug!(operation, code = err.error_code(), error = %err, "Request rejected");
            ServiceResponse::failure(&err)
        }
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            error!(operation, panic = %detail, "Operation panicked");
            ServiceResponse::failure(&ExchangeError::Internal(detail))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    UserId::parse(raw.trim()).map_err(|_| {
        ExchangeError::invalid_input(format!("Invalid user id '{}'", raw), "user_id")
    })
}

fn validate_registration(request: &CreateAccountRequest) -> Result<()> {
    if request.username.trim().is_empty()
        || request.email.trim().is_empty()
        || request.password.is_empty()
    {
        return Err(ExchangeError::InvalidInput {
            message: "Username, email, and password are required".to_string(),
            field: None,
        });
    }

    if !request.email.contains('@') {
        return Err(ExchangeError::invalid_input(
            format!("Invalid email address '{}'", request.email),
            "email",
        ));
    }

    Ok(())
}
