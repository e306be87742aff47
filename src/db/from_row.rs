//! Row mapping for query results.
//!
//! Each model has a column-list constant (`*_COLS`) whose order matches its
//! `FromRow` impl, so queries are written as `SELECT {COLS} FROM ...`.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Params, Row, types::Type};

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Parse a TEXT column into a strum-backed enum.
fn parse_enum<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected enum value: {raw}").into(),
        )
    })
}

/// Parse a nullable JSON TEXT column.
fn parse_json_opt<T: serde::de::DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub const PROMO_CODE_COLS: &str = "id, code, discount_type, discount_value, max_uses, current_uses, valid_from, valid_until, applicable_plans, new_users_only, description, created_at";

impl FromRow for PromoCode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PromoCode {
            id: row.get(0)?,
            code: row.get(1)?,
            discount_type: parse_enum(row, 2)?,
            discount_value: row.get(3)?,
            max_uses: row.get(4)?,
            current_uses: row.get(5)?,
            valid_from: row.get(6)?,
            valid_until: row.get(7)?,
            applicable_plans: parse_json_opt(row, 8)?,
            new_users_only: row.get::<_, i32>(9)? != 0,
            description: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

pub const PROMO_CODE_USE_COLS: &str = "id, promo_code_id, user_id, subscription_id, used_at";

impl FromRow for PromoCodeUse {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PromoCodeUse {
            id: row.get(0)?,
            promo_code_id: row.get(1)?,
            user_id: row.get(2)?,
            subscription_id: row.get(3)?,
            used_at: row.get(4)?,
        })
    }
}

pub const SUBSCRIPTION_COLS: &str = "id, user_id, status, plan_type, billing_key_encrypted, payment_method, card_last_four, card_issuer, started_at, current_period_start, current_period_end, price_per_month, total_paid, order_id, cancelled_at, created_at";

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: parse_enum(row, 2)?,
            plan_type: parse_enum(row, 3)?,
            billing_key_encrypted: row.get(4)?,
            payment_method: parse_enum(row, 5)?,
            card_last_four: row.get(6)?,
            card_issuer: row.get(7)?,
            started_at: row.get(8)?,
            current_period_start: row.get(9)?,
            current_period_end: row.get(10)?,
            price_per_month: row.get(11)?,
            total_paid: row.get(12)?,
            order_id: row.get(13)?,
            cancelled_at: row.get(14)?,
            created_at: row.get(15)?,
        })
    }
}

pub const TRANSACTION_COLS: &str = "id, subscription_id, user_id, status, transaction_type, gateway_provider, gateway_transaction_id, amount, net_amount, paid_at, metadata, created_at";

impl FromRow for PaymentTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentTransaction {
            id: row.get(0)?,
            subscription_id: row.get(1)?,
            user_id: row.get(2)?,
            status: parse_enum(row, 3)?,
            transaction_type: parse_enum(row, 4)?,
            gateway_provider: row.get(5)?,
            gateway_transaction_id: row.get(6)?,
            amount: row.get(7)?,
            net_amount: row.get(8)?,
            paid_at: row.get(9)?,
            metadata: parse_json_opt(row, 10)?.unwrap_or_default(),
            created_at: row.get(11)?,
        })
    }
}

pub const USER_ACCOUNT_COLS: &str = "id, is_premium, premium_expires_at, updated_at";

impl FromRow for UserAccount {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UserAccount {
            id: row.get(0)?,
            is_premium: row.get::<_, i32>(1)? != 0,
            premium_expires_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }
}

pub const CHECKOUT_ORDER_COLS: &str = "order_id, user_id, plan_type, base_amount, final_amount, promo_code_id, free_trial_days, created_at";

impl FromRow for CheckoutOrder {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CheckoutOrder {
            order_id: row.get(0)?,
            user_id: row.get(1)?,
            plan_type: parse_enum(row, 2)?,
            base_amount: row.get(3)?,
            final_amount: row.get(4)?,
            promo_code_id: row.get(5)?,
            free_trial_days: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

pub const ORDER_ACTIVATION_COLS: &str =
    "order_id, user_id, plan_type, amount, promo_code_id, subscription_id, created_at";

impl FromRow for OrderActivation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderActivation {
            order_id: row.get(0)?,
            user_id: row.get(1)?,
            plan_type: parse_enum(row, 2)?,
            amount: row.get(3)?,
            promo_code_id: row.get(4)?,
            subscription_id: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

pub const SAGA_FOLLOWUP_COLS: &str =
    "id, order_id, user_id, step, detail, created_at, resolved_at";

impl FromRow for SagaFollowup {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SagaFollowup {
            id: row.get(0)?,
            order_id: row.get(1)?,
            user_id: row.get(2)?,
            step: parse_enum(row, 3)?,
            detail: row.get(4)?,
            created_at: row.get(5)?,
            resolved_at: row.get(6)?,
        })
    }
}

pub fn query_one<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<T>> {
    let row = conn.query_row(sql, params, |row| T::from_row(row)).optional()?;
    Ok(row)
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
