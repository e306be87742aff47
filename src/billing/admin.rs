use serde::Serialize;

use crate::db::{DbPool, queries};
use crate::error::{Result, ValidationError};
use crate::models::*;

/// Upper bound for an explicit grant duration (ten years).
pub const MAX_GRANT_DAYS: i64 = 3650;

#[derive(Debug, Clone, Serialize)]
pub struct Grant {
    pub subscription: Subscription,
    /// None when the premium flag could not be refreshed; a follow-up exists.
    pub account: Option<UserAccount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Revocation {
    /// The subscription that was cancelled, or None if nothing was active.
    pub cancelled: Option<Subscription>,
    pub account: Option<UserAccount>,
}

/// Payment-free entry point for administrators.
///
/// Callers must have already established that the caller is an administrator.
pub struct AdminOverrideActivator {
    pool: DbPool,
}

impl AdminOverrideActivator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Grant premium without a payment. A currently active subscription for
    /// the user is superseded (cancelled) by the grant, except a paid one that
    /// ends after the grant would: that grant is refused.
    pub fn grant(
        &self,
        admin_id: &str,
        target_user_id: &str,
        plan_type: PlanType,
        duration_days: Option<i64>,
    ) -> Result<Grant> {
        let target_user_id = target_user_id.trim();
        if target_user_id.is_empty() {
            return Err(ValidationError::Invalid("target user id is required".into()).into());
        }
        if matches!(duration_days, Some(days) if !(1..=MAX_GRANT_DAYS).contains(&days)) {
            return Err(ValidationError::Invalid(format!(
                "duration_days must be between 1 and {}",
                MAX_GRANT_DAYS
            ))
            .into());
        }

        let started_at = queries::now();
        let new_subscription = NewSubscription {
            user_id: target_user_id.to_string(),
            plan_type,
            billing_key_encrypted: None,
            payment_method: PaymentMethod::AdminGranted,
            card: CardDetails::default(),
            started_at,
            current_period_end: period_end(started_at, plan_type, duration_days),
            price_per_month: 0,
            total_paid: 0,
            order_id: None,
        };

        let mut conn = self.pool.get()?;
        let subscription = queries::create_subscription(&mut conn, &new_subscription)?;

        tracing::info!(
            admin_id,
            user_id = target_user_id,
            subscription_id = %subscription.id,
            plan_type = %plan_type,
            duration_days,
            "Premium granted"
        );

        let account = self.refresh_flag(&conn, admin_id, target_user_id, queries::now());
        Ok(Grant {
            subscription,
            account,
        })
    }

    /// Cancel the user's active subscription and clear the premium flag.
    ///
    /// Revoking a user with nothing active succeeds without changes.
    pub fn revoke(&self, admin_id: &str, target_user_id: &str) -> Result<Revocation> {
        let target_user_id = target_user_id.trim();
        if target_user_id.is_empty() {
            return Err(ValidationError::Invalid("target user id is required".into()).into());
        }

        let now = queries::now();
        let mut conn = self.pool.get()?;
        let cancelled = queries::cancel_active_subscription(&mut conn, target_user_id, now)?;

        match &cancelled {
            Some(subscription) => tracing::info!(
                admin_id,
                user_id = target_user_id,
                subscription_id = %subscription.id,
                "Premium revoked"
            ),
            None => tracing::info!(
                admin_id,
                user_id = target_user_id,
                "Revoke requested but no active subscription"
            ),
        }

        let account = self.refresh_flag(&conn, admin_id, target_user_id, now);
        Ok(Revocation { cancelled, account })
    }

    /// Re-derive the premium flag. A failure leaves a follow-up for the
    /// reconciler instead of failing the admin action.
    fn refresh_flag(
        &self,
        conn: &rusqlite::Connection,
        admin_id: &str,
        user_id: &str,
        now: i64,
    ) -> Option<UserAccount> {
        match queries::sync_premium_flag(conn, user_id, now) {
            Ok(account) => Some(account),
            Err(e) => {
                tracing::error!(
                    admin_id,
                    user_id,
                    step = %SagaStep::UpdatePremiumFlag,
                    error = %e,
                    "Premium flag update failed"
                );
                let detail = format!("Admin {} action: premium flag not refreshed: {}", admin_id, e);
                if let Err(e) = queries::record_saga_followup(
                    conn,
                    None,
                    user_id,
                    SagaStep::UpdatePremiumFlag,
                    &detail,
                ) {
                    tracing::error!(user_id, error = %e, "Failed to record saga follow-up");
                }
                None
            }
        }
    }
}
