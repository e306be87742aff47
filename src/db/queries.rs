use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    CHECKOUT_ORDER_COLS, ORDER_ACTIVATION_COLS, PROMO_CODE_COLS, PROMO_CODE_USE_COLS,
    SAGA_FOLLOWUP_COLS, SUBSCRIPTION_COLS, TRANSACTION_COLS, USER_ACCOUNT_COLS, query_all,
    query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ============ Promo Codes ============

/// Insert a promo code. `code` must already be normalized.
pub fn create_promo_code(conn: &Connection, code: &str, input: &CreatePromoCode) -> Result<PromoCode> {
    let id = gen_id();
    let now = now();
    let plans_json = input
        .applicable_plans
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO promo_codes (id, code, discount_type, discount_value, max_uses, current_uses, valid_from, valid_until, applicable_plans, new_users_only, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            code,
            input.discount_type.as_ref(),
            input.discount_value,
            input.max_uses,
            input.valid_from,
            input.valid_until,
            plans_json,
            input.new_users_only as i32,
            &input.description,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::BadRequest("Promo code already exists".into())
        } else {
            e.into()
        }
    })?;

    Ok(PromoCode {
        id,
        code: code.to_string(),
        discount_type: input.discount_type,
        discount_value: input.discount_value,
        max_uses: input.max_uses,
        current_uses: 0,
        valid_from: input.valid_from,
        valid_until: input.valid_until,
        applicable_plans: input.applicable_plans.clone(),
        new_users_only: input.new_users_only,
        description: input.description.clone(),
        created_at: now,
    })
}

pub fn get_promo_code_by_id(conn: &Connection, id: &str) -> Result<Option<PromoCode>> {
    query_one(
        conn,
        &format!("SELECT {} FROM promo_codes WHERE id = ?1", PROMO_CODE_COLS),
        [id],
    )
}

/// Look up by normalized code.
pub fn get_promo_code_by_code(conn: &Connection, code: &str) -> Result<Option<PromoCode>> {
    query_one(
        conn,
        &format!("SELECT {} FROM promo_codes WHERE code = ?1", PROMO_CODE_COLS),
        [code],
    )
}

pub fn list_promo_codes(conn: &Connection) -> Result<Vec<PromoCode>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM promo_codes ORDER BY created_at DESC",
            PROMO_CODE_COLS
        ),
        [],
    )
}

pub fn has_promo_code_use(conn: &Connection, promo_code_id: &str, user_id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM promo_code_uses WHERE promo_code_id = ?1 AND user_id = ?2)",
        params![promo_code_id, user_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn list_promo_code_uses(conn: &Connection, promo_code_id: &str) -> Result<Vec<PromoCodeUse>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM promo_code_uses WHERE promo_code_id = ?1 ORDER BY used_at",
            PROMO_CODE_USE_COLS
        ),
        [promo_code_id],
    )
}

/// Result of attempting to redeem one use of a promo code.
#[derive(Debug)]
pub enum RedemptionResult {
    Recorded(PromoCodeUse),
    /// This user already has a use row for the code.
    AlreadyUsed,
    /// `current_uses` already reached `max_uses`.
    Exhausted,
    UnknownCode,
}

/// Atomically consume one use of a promo code for a user.
///
/// The capped increment and the per-user insert run inside one IMMEDIATE
/// transaction, so two callers racing for the last slot serialize on the write
/// lock: exactly one sees `current_uses < max_uses`. If the user already has a
/// use row, the transaction is dropped and the increment rolls back.
pub fn redeem_promo_code_atomic(
    conn: &mut Connection,
    promo_code_id: &str,
    user_id: &str,
    subscription_id: Option<&str>,
) -> Result<RedemptionResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let incremented = tx.execute(
        "UPDATE promo_codes SET current_uses = current_uses + 1
         WHERE id = ?1 AND (max_uses IS NULL OR current_uses < max_uses)",
        params![promo_code_id],
    )?;

    if incremented == 0 {
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM promo_codes WHERE id = ?1)",
            params![promo_code_id],
            |row| row.get(0),
        )?;
        return Ok(if exists {
            RedemptionResult::Exhausted
        } else {
            RedemptionResult::UnknownCode
        });
    }

    let id = gen_id();
    let used_at = now();
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO promo_code_uses (id, promo_code_id, user_id, subscription_id, used_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, promo_code_id, user_id, subscription_id, used_at],
    )?;

    if inserted == 0 {
        // Dropping the transaction rolls back the increment.
        return Ok(RedemptionResult::AlreadyUsed);
    }

    tx.commit()?;

    Ok(RedemptionResult::Recorded(PromoCodeUse {
        id,
        promo_code_id: promo_code_id.to_string(),
        user_id: user_id.to_string(),
        subscription_id: subscription_id.map(String::from),
        used_at,
    }))
}

// ============ Subscriptions ============

pub fn get_subscription_by_id(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        [id],
    )
}

pub fn get_active_subscription(conn: &Connection, user_id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 AND status = 'active'
             ORDER BY started_at DESC LIMIT 1",
            SUBSCRIPTION_COLS
        ),
        [user_id],
    )
}

pub fn list_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 ORDER BY started_at DESC",
            SUBSCRIPTION_COLS
        ),
        [user_id],
    )
}

/// Number of subscriptions the user has ever had, any status.
pub fn count_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM subscriptions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Cancel whatever subscription is currently active for the user so a new one
/// can take its place under the one-active-per-user index.
fn supersede_active_subscription(conn: &Connection, user_id: &str, at: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = 'cancelled', cancelled_at = ?2
         WHERE user_id = ?1 AND status = 'active'",
        params![user_id, at],
    )?;
    Ok(affected)
}

fn insert_subscription(conn: &Connection, input: &NewSubscription) -> Result<Subscription> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO subscriptions (id, user_id, status, plan_type, billing_key_encrypted, payment_method, card_last_four, card_issuer, started_at, current_period_start, current_period_end, price_per_month, total_paid, order_id, cancelled_at, created_at)
         VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, ?10, ?11, ?12, NULL, ?13)",
        params![
            &id,
            &input.user_id,
            input.plan_type.as_ref(),
            &input.billing_key_encrypted,
            input.payment_method.as_ref(),
            &input.card.last_four,
            &input.card.issuer,
            input.started_at,
            input.current_period_end,
            input.price_per_month,
            input.total_paid,
            &input.order_id,
            now
        ],
    )?;

    Ok(Subscription {
        id,
        user_id: input.user_id.clone(),
        status: SubscriptionStatus::Active,
        plan_type: input.plan_type,
        billing_key_encrypted: input.billing_key_encrypted.clone(),
        payment_method: input.payment_method,
        card_last_four: input.card.last_four.clone(),
        card_issuer: input.card.issuer.clone(),
        started_at: input.started_at,
        current_period_start: input.started_at,
        current_period_end: input.current_period_end,
        price_per_month: input.price_per_month,
        total_paid: input.total_paid,
        order_id: input.order_id.clone(),
        cancelled_at: None,
        created_at: now,
    })
}

/// Create a subscription outside any order (admin grants).
///
/// A previously active subscription for the user is cancelled in the same
/// transaction, unless it is a paid subscription that would outlive the new
/// one: cutting a paid period short is a `ConsistencyViolation`.
pub fn create_subscription(conn: &mut Connection, input: &NewSubscription) -> Result<Subscription> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(active) = get_active_subscription(&tx, &input.user_id)? {
        if active.payment_method == PaymentMethod::Card
            && active.current_period_end > input.current_period_end
        {
            return Err(AppError::ConsistencyViolation(format!(
                "User {} has a paid subscription {} running until {}, past the requested end {}",
                input.user_id, active.id, active.current_period_end, input.current_period_end
            )));
        }
    }

    supersede_active_subscription(&tx, &input.user_id, input.started_at)?;
    let subscription = insert_subscription(&tx, input)?;
    tx.commit()?;
    Ok(subscription)
}

/// Outcome of creating the subscription for a paid order.
#[derive(Debug)]
pub enum OrderSubscriptionResult {
    Created(Subscription),
    /// The order was already activated with the same parameters.
    Existing(Subscription),
    /// The order was already activated with different parameters.
    Conflict(OrderActivation),
}

/// Create the subscription for an order, idempotent on `order_id`.
///
/// The idempotency lookup, the supersede of any active subscription, the
/// insert and the `order_activations` row all commit together, so concurrent
/// activations of the same order produce exactly one subscription.
pub fn create_subscription_for_order(
    conn: &mut Connection,
    order_id: &str,
    amount: i64,
    promo_code_id: Option<&str>,
    input: &NewSubscription,
) -> Result<OrderSubscriptionResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing: Option<OrderActivation> = query_one(
        &tx,
        &format!(
            "SELECT {} FROM order_activations WHERE order_id = ?1",
            ORDER_ACTIVATION_COLS
        ),
        [order_id],
    )?;

    if let Some(activation) = existing {
        if !activation.matches(&input.user_id, input.plan_type, amount, promo_code_id) {
            return Ok(OrderSubscriptionResult::Conflict(activation));
        }
        let subscription = get_subscription_by_id(&tx, &activation.subscription_id)?
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "Order {} points at missing subscription {}",
                    order_id, activation.subscription_id
                ))
            })?;
        return Ok(OrderSubscriptionResult::Existing(subscription));
    }

    supersede_active_subscription(&tx, &input.user_id, input.started_at)?;
    let subscription = insert_subscription(&tx, input)?;

    tx.execute(
        "INSERT INTO order_activations (order_id, user_id, plan_type, amount, promo_code_id, subscription_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            order_id,
            &input.user_id,
            input.plan_type.as_ref(),
            amount,
            promo_code_id,
            &subscription.id,
            now()
        ],
    )?;

    tx.commit()?;
    Ok(OrderSubscriptionResult::Created(subscription))
}

/// Cancel the user's active subscription, if any.
///
/// Returns the cancelled subscription, or `None` when nothing was active.
/// The UPDATE is conditional on `status = 'active'`, so a concurrent revoke
/// cannot cancel the same row twice.
pub fn cancel_active_subscription(
    conn: &mut Connection,
    user_id: &str,
    at: i64,
) -> Result<Option<Subscription>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(active) = get_active_subscription(&tx, user_id)? else {
        return Ok(None);
    };

    let affected = tx.execute(
        "UPDATE subscriptions SET status = 'cancelled', cancelled_at = ?2
         WHERE id = ?1 AND status = 'active'",
        params![&active.id, at],
    )?;
    tx.commit()?;

    if affected == 0 {
        return Ok(None);
    }

    Ok(Some(Subscription {
        status: SubscriptionStatus::Cancelled,
        cancelled_at: Some(at),
        ..active
    }))
}

// ============ Payment Transactions ============

pub fn insert_payment_transaction(
    conn: &Connection,
    input: &NewPaymentTransaction,
) -> Result<PaymentTransaction> {
    let id = gen_id();
    let now = now();
    let metadata = serde_json::to_string(&input.metadata)?;

    conn.execute(
        "INSERT INTO payment_transactions (id, subscription_id, user_id, status, transaction_type, gateway_provider, gateway_transaction_id, amount, net_amount, paid_at, metadata, order_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &id,
            &input.subscription_id,
            &input.user_id,
            input.status.as_ref(),
            input.transaction_type.as_ref(),
            &input.gateway_provider,
            &input.gateway_transaction_id,
            input.amount,
            input.net_amount,
            input.paid_at,
            metadata,
            &input.metadata.order_id,
            now
        ],
    )?;

    Ok(PaymentTransaction {
        id,
        subscription_id: input.subscription_id.clone(),
        user_id: input.user_id.clone(),
        status: input.status,
        transaction_type: input.transaction_type,
        gateway_provider: input.gateway_provider.clone(),
        gateway_transaction_id: input.gateway_transaction_id.clone(),
        amount: input.amount,
        net_amount: input.net_amount,
        paid_at: input.paid_at,
        metadata: input.metadata.clone(),
        created_at: now,
    })
}

pub fn get_transaction_by_id(conn: &Connection, id: &str) -> Result<Option<PaymentTransaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_transactions WHERE id = ?1", TRANSACTION_COLS),
        [id],
    )
}

pub fn get_transaction_by_order_id(
    conn: &Connection,
    order_id: &str,
) -> Result<Option<PaymentTransaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_transactions WHERE order_id = ?1",
            TRANSACTION_COLS
        ),
        [order_id],
    )
}

pub fn list_transactions_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<PaymentTransaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_transactions WHERE user_id = ?1 ORDER BY created_at DESC",
            TRANSACTION_COLS
        ),
        [user_id],
    )
}

/// Completed transactions paid within `[from, to)`. Either bound may be open.
pub fn list_completed_transactions(
    conn: &Connection,
    from: Option<i64>,
    to: Option<i64>,
) -> Result<Vec<PaymentTransaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_transactions
             WHERE status = 'completed'
               AND (?1 IS NULL OR paid_at >= ?1)
               AND (?2 IS NULL OR paid_at < ?2)
             ORDER BY paid_at DESC, created_at DESC",
            TRANSACTION_COLS
        ),
        params![from, to],
    )
}

/// Flip a completed transaction to refunded. Returns false if it was not completed.
pub fn mark_transaction_refunded(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_transactions SET status = 'refunded' WHERE id = ?1 AND status = 'completed'",
        params![id],
    )?;
    Ok(affected > 0)
}

// ============ User Accounts ============

pub fn get_user_account(conn: &Connection, user_id: &str) -> Result<Option<UserAccount>> {
    query_one(
        conn,
        &format!("SELECT {} FROM user_accounts WHERE id = ?1", USER_ACCOUNT_COLS),
        [user_id],
    )
}

/// Recompute the premium projection for a user from the subscriptions table.
///
/// `is_premium` is true when an active subscription's period has not ended;
/// `premium_expires_at` is the active period end, or `now` when nothing is active.
/// Being a single upsert derived from the authoritative rows, concurrent
/// callers converge on the same value regardless of ordering.
pub fn sync_premium_flag(conn: &Connection, user_id: &str, now: i64) -> Result<UserAccount> {
    conn.execute(
        "INSERT INTO user_accounts (id, is_premium, premium_expires_at, updated_at)
         VALUES (
             ?1,
             EXISTS (SELECT 1 FROM subscriptions
                     WHERE user_id = ?1 AND status = 'active' AND current_period_end > ?2),
             COALESCE((SELECT MAX(current_period_end) FROM subscriptions
                       WHERE user_id = ?1 AND status = 'active'), ?2),
             ?2
         )
         ON CONFLICT(id) DO UPDATE SET
             is_premium = excluded.is_premium,
             premium_expires_at = excluded.premium_expires_at,
             updated_at = excluded.updated_at",
        params![user_id, now],
    )?;

    get_user_account(conn, user_id)?
        .ok_or_else(|| AppError::Internal("User account missing after upsert".into()))
}

/// Every user the projection knows about or should know about.
pub fn list_known_user_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM user_accounts
         UNION
         SELECT DISTINCT user_id FROM subscriptions",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

// ============ Checkout Orders ============

pub fn create_checkout_order(conn: &Connection, order: &CheckoutOrder) -> Result<()> {
    conn.execute(
        "INSERT INTO checkout_orders (order_id, user_id, plan_type, base_amount, final_amount, promo_code_id, free_trial_days, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &order.order_id,
            &order.user_id,
            order.plan_type.as_ref(),
            order.base_amount,
            order.final_amount,
            &order.promo_code_id,
            order.free_trial_days,
            order.created_at
        ],
    )?;
    Ok(())
}

pub fn get_checkout_order(conn: &Connection, order_id: &str) -> Result<Option<CheckoutOrder>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM checkout_orders WHERE order_id = ?1",
            CHECKOUT_ORDER_COLS
        ),
        [order_id],
    )
}

// ============ Order Activations ============

pub fn get_order_activation(conn: &Connection, order_id: &str) -> Result<Option<OrderActivation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM order_activations WHERE order_id = ?1",
            ORDER_ACTIVATION_COLS
        ),
        [order_id],
    )
}

pub fn count_order_activations(conn: &Connection, order_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM order_activations WHERE order_id = ?1",
        params![order_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Saga Follow-ups ============

pub fn record_saga_followup(
    conn: &Connection,
    order_id: Option<&str>,
    user_id: &str,
    step: SagaStep,
    detail: &str,
) -> Result<SagaFollowup> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO saga_followups (id, order_id, user_id, step, detail, created_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        params![&id, order_id, user_id, step.as_ref(), detail, now],
    )?;

    Ok(SagaFollowup {
        id,
        order_id: order_id.map(String::from),
        user_id: user_id.to_string(),
        step,
        detail: detail.to_string(),
        created_at: now,
        resolved_at: None,
    })
}

pub fn list_open_followups(conn: &Connection) -> Result<Vec<SagaFollowup>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM saga_followups WHERE resolved_at IS NULL ORDER BY created_at",
            SAGA_FOLLOWUP_COLS
        ),
        [],
    )
}

pub fn list_followups_for_order(conn: &Connection, order_id: &str) -> Result<Vec<SagaFollowup>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM saga_followups WHERE order_id = ?1 ORDER BY created_at",
            SAGA_FOLLOWUP_COLS
        ),
        [order_id],
    )
}

/// Resolve the open premium-flag follow-ups for a user after a reconcile.
pub fn resolve_premium_followups(conn: &Connection, user_id: &str, at: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE saga_followups SET resolved_at = ?3
         WHERE user_id = ?1 AND step = ?2 AND resolved_at IS NULL",
        params![user_id, SagaStep::UpdatePremiumFlag.as_ref(), at],
    )?;
    Ok(affected)
}

pub fn resolve_followup(conn: &Connection, id: &str, at: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE saga_followups SET resolved_at = ?2 WHERE id = ?1 AND resolved_at IS NULL",
        params![id, at],
    )?;
    Ok(affected > 0)
}

/// True when a followup with this id exists, resolved or not.
pub fn followup_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM saga_followups WHERE id = ?1",
            params![id],
            |row| row.get::<_, i32>(0),
        )
        .optional()?;
    Ok(found.is_some())
}
