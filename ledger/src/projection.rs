//! Rebuilding balances from the journal.

use std::collections::BTreeMap;

use kantor_common::{Currency, ExchangeError, Result, UserId};
use rust_decimal::Decimal;

use crate::balance::{AccountBalance, CurrencyPosition};
use crate::journal::{PageRequest, Transaction, TransactionJournal, TransactionKind, TransactionStatus};

const REPLAY_PAGE_SIZE: usize = 256;

/// Balances derived purely from journaled transactions.
#[derive(Debug, Clone, Default)]
pub struct BalanceProjection {
    pub home_balance: Decimal,
    pub positions: BTreeMap<Currency, CurrencyPosition>,
}

impl BalanceProjection {
    /// Apply transactions in chronological order.
    pub fn replay<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Result<Self> {
        let mut projection = Self::default();
        for transaction in transactions {
            projection.apply(transaction)?;
        }
        Ok(projection)
    }

    fn apply(&mut self, tx: &Transaction) -> Result<()> {
        if tx.status != TransactionStatus::Completed {
            return Ok(());
        }

        self.home_balance = self
            .home_balance
            .checked_add(tx.home_delta())
            .ok_or_else(|| {
                ExchangeError::InvariantViolation(format!("replaying {} overflows home balance", tx.id))
            })?;
        if self.home_balance < Decimal::ZERO {
            return Err(ExchangeError::InvariantViolation(format!(
                "replaying {} drives home balance negative",
                tx.id
            )));
        }

        match tx.kind {
            TransactionKind::TopUp => {}
            TransactionKind::Buy => {
                self.positions
                    .entry(tx.currency.clone())
                    .or_insert_with(|| CurrencyPosition::empty(tx.currency.clone()))
                    .apply_buy(tx.quantity, tx.rate)?;
            }
            TransactionKind::Sell => {
                let position = self.positions.get_mut(&tx.currency).ok_or_else(|| {
                    ExchangeError::InvariantViolation(format!(
                        "replaying {} sells {} never bought",
                        tx.id, tx.currency
                    ))
                })?;
                position.apply_sell(tx.quantity)?;
            }
        }
        Ok(())
    }

    /// Check the projection agrees with a ledger snapshot (timestamps ignored).
    pub fn matches(&self, balance: &AccountBalance) -> bool {
        self.home_balance == balance.home_balance
            && self.positions.len() == balance.positions.len()
            && balance.positions.iter().all(|p| {
                self.positions
                    .get(&p.currency)
                    .map(|mine| mine.same_holding(p))
                    .unwrap_or(false)
            })
    }
}

/// Read a user's full history from a journal and replay it.
pub async fn replay_journal(
    journal: &dyn TransactionJournal,
    user_id: &UserId,
) -> Result<BalanceProjection> {
    let mut history = Vec::new();
    let mut page_number = 1;

    loop {
        let page = journal
            .list_for_user(user_id, PageRequest::new(REPLAY_PAGE_SIZE, page_number)?)
            .await?;
        let fetched = page.items.len();
        history.extend(page.items);

        if fetched < REPLAY_PAGE_SIZE || history.len() >= page.total_count {
            break;
        }
        page_number += 1;
    }

    // Listings are newest first.
    history.reverse();
    BalanceProjection::replay(&history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryJournal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_replay_trades() {
        let user_id = UserId::new();
        let history = vec![
            Transaction::top_up(user_id, dec!(1000), "init"),
            Transaction::trade(TransactionKind::Buy, user_id, Currency::usd(), dec!(100), dec!(4.08), dec!(408)),
            Transaction::trade(TransactionKind::Sell, user_id, Currency::usd(), dec!(50), dec!(3.92), dec!(196)),
        ];

        let projection = BalanceProjection::replay(&history).unwrap();

        assert_eq!(projection.home_balance, dec!(788));
        let usd = &projection.positions[&Currency::usd()];
        assert_eq!(usd.amount, dec!(50));
        assert_eq!(usd.average_rate, dec!(4.08));
    }

    #[test]
    fn test_replay_rejects_inconsistent_history() {
        let user_id = UserId::new();
        let history = vec![Transaction::trade(
            TransactionKind::Sell,
            user_id,
            Currency::eur(),
            dec!(1),
            dec!(4.2),
            dec!(4.2),
        )];

        assert!(matches!(
            BalanceProjection::replay(&history),
            Err(ExchangeError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_failed_transactions_skipped() {
        let user_id = UserId::new();
        let mut failed = Transaction::top_up(user_id, dec!(500), "bounced");
        failed.status = TransactionStatus::Failed;

        let projection = BalanceProjection::replay(&[failed]).unwrap();
        assert_eq!(projection.home_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_replay_journal_spans_pages() {
        let journal = InMemoryJournal::new();
        let user_id = UserId::new();
        for _ in 0..(REPLAY_PAGE_SIZE + 3) {
            journal
                .append(Transaction::top_up(user_id, dec!(1), "drip"))
                .await
                .unwrap();
        }

        let projection = replay_journal(&journal, &user_id).await.unwrap();
        assert_eq!(projection.home_balance, Decimal::from(REPLAY_PAGE_SIZE as u64 + 3));
    }
}
