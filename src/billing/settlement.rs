//! Read-only settlement report over completed transactions.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::activation::PROMO_CODE_METHOD;
use crate::db::queries;
use crate::error::{Result, ValidationError};
use crate::models::PaymentTransaction;

const CASH_METHOD: &str = "cash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementChannel {
    Card,
    Cash,
    PromoCodeOnly,
}

impl SettlementChannel {
    /// First match wins: promo code, then cash, then card.
    pub fn of(tx: &PaymentTransaction) -> Self {
        let method = tx.metadata.payment_method.as_deref();
        if tx.metadata.promo_code_id.is_some() || method == Some(PROMO_CODE_METHOD) {
            SettlementChannel::PromoCodeOnly
        } else if method == Some(CASH_METHOD) {
            SettlementChannel::Cash
        } else {
            SettlementChannel::Card
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementTotals {
    pub card: i64,
    pub cash: i64,
    pub promo_code_only: i64,
    pub all: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Settlement {
    pub card: Vec<PaymentTransaction>,
    pub cash: Vec<PaymentTransaction>,
    pub promo_code_only: Vec<PaymentTransaction>,
    pub all: Vec<PaymentTransaction>,
    pub totals: SettlementTotals,
}

/// Partition transactions by channel. Every input lands in `all` and in
/// exactly one channel bucket.
pub fn classify(transactions: &[PaymentTransaction]) -> Settlement {
    let mut settlement = Settlement::default();

    for tx in transactions {
        let (bucket, total) = match SettlementChannel::of(tx) {
            SettlementChannel::Card => (&mut settlement.card, &mut settlement.totals.card),
            SettlementChannel::Cash => (&mut settlement.cash, &mut settlement.totals.cash),
            SettlementChannel::PromoCodeOnly => (
                &mut settlement.promo_code_only,
                &mut settlement.totals.promo_code_only,
            ),
        };
        bucket.push(tx.clone());
        *total += tx.net_amount;

        settlement.all.push(tx.clone());
        settlement.totals.all += tx.net_amount;
    }

    settlement
}

/// Settlement for completed transactions paid in `[from, to)`, optionally
/// restricted to one channel.
pub fn get_settlement(
    conn: &Connection,
    from: Option<i64>,
    to: Option<i64>,
    channel: Option<SettlementChannel>,
) -> Result<Settlement> {
    if matches!((from, to), (Some(from), Some(to)) if from >= to) {
        return Err(ValidationError::Invalid("from must be before to".into()).into());
    }

    let mut transactions = queries::list_completed_transactions(conn, from, to)?;
    if let Some(channel) = channel {
        transactions.retain(|tx| SettlementChannel::of(tx) == channel);
    }

    Ok(classify(&transactions))
}
