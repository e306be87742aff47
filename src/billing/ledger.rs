//! Promo code eligibility and redemption.
//!
//! Eligibility is a read-only preview. Redemption is the only place the usage
//! counter moves, and it moves inside one storage transaction (see
//! `queries::redeem_promo_code_atomic`).

use rusqlite::Connection;
use serde::Serialize;

use super::discount::{DiscountOutcome, apply_discount};
use crate::db::queries::{self, RedemptionResult};
use crate::error::{AppError, PromoRejection, Result, ValidationError};
use crate::models::{PlanType, PromoCode, PromoCodeUse};
use crate::util::normalize_promo_code;

#[derive(Debug, Clone, Serialize)]
pub struct EligiblePromo {
    pub promo: PromoCode,
    pub discount: DiscountOutcome,
}

#[derive(Debug, Clone)]
pub enum EligibilityResult {
    Eligible(EligiblePromo),
    Rejected(PromoRejection),
}

impl EligibilityResult {
    /// Convert a rejection into the caller-facing validation error.
    pub fn into_eligible(self) -> Result<EligiblePromo> {
        match self {
            EligibilityResult::Eligible(promo) => Ok(promo),
            EligibilityResult::Rejected(reason) => {
                Err(ValidationError::Ineligible(reason).into())
            }
        }
    }
}

/// Check whether `raw_code` can be applied by `user_id` to `plan_type`.
///
/// Checks run in a fixed order and the first failure wins: existence,
/// validity window, remaining uses, plan, new-user restriction, prior use.
pub fn check_eligibility(
    conn: &Connection,
    raw_code: &str,
    plan_type: PlanType,
    user_id: &str,
    base_price: i64,
    now: i64,
) -> Result<EligibilityResult> {
    let code = normalize_promo_code(raw_code)?;

    let Some(promo) = queries::get_promo_code_by_code(conn, &code)? else {
        return Ok(EligibilityResult::Rejected(PromoRejection::NotFound));
    };

    if let Some(reason) = first_rejection(conn, &promo, plan_type, user_id, now)? {
        return Ok(EligibilityResult::Rejected(reason));
    }

    let discount = apply_discount(base_price, promo.discount_type, promo.discount_value)
        .map_err(|e| AppError::Internal(format!("Promo code {} is unusable: {}", promo.id, e)))?;

    Ok(EligibilityResult::Eligible(EligiblePromo { promo, discount }))
}

/// Re-run the eligibility checks for a promo code already attached to an
/// order, right before the order is confirmed.
///
/// Pending checkouts reserve nothing, so a code that was eligible when the
/// order was priced may no longer be. Returns the first failing check, if any.
pub fn recheck_for_order(
    conn: &Connection,
    promo_code_id: &str,
    plan_type: PlanType,
    user_id: &str,
    now: i64,
) -> Result<Option<PromoRejection>> {
    match queries::get_promo_code_by_id(conn, promo_code_id)? {
        Some(promo) => first_rejection(conn, &promo, plan_type, user_id, now),
        None => Ok(Some(PromoRejection::NotFound)),
    }
}

/// Checks after existence, in their fixed order.
fn first_rejection(
    conn: &Connection,
    promo: &PromoCode,
    plan_type: PlanType,
    user_id: &str,
    now: i64,
) -> Result<Option<PromoRejection>> {
    let reason = if !promo.is_within_validity(now) {
        Some(PromoRejection::Expired)
    } else if !promo.has_remaining_uses() {
        Some(PromoRejection::ExhaustedUses)
    } else if !promo.applies_to(plan_type) {
        Some(PromoRejection::PlanMismatch)
    } else if promo.new_users_only && queries::count_subscriptions_for_user(conn, user_id)? > 0 {
        Some(PromoRejection::NotNewUser)
    } else if queries::has_promo_code_use(conn, &promo.id, user_id)? {
        Some(PromoRejection::AlreadyUsed)
    } else {
        None
    };
    Ok(reason)
}

/// Consume one use of a promo code for a user.
///
/// Exhaustion and prior use are reported as `PromoRejection`s so callers can
/// treat them like eligibility failures.
pub fn record_use(
    conn: &mut Connection,
    promo_code_id: &str,
    user_id: &str,
    subscription_id: Option<&str>,
) -> Result<std::result::Result<PromoCodeUse, PromoRejection>> {
    let outcome = queries::redeem_promo_code_atomic(conn, promo_code_id, user_id, subscription_id)?;
    Ok(match outcome {
        RedemptionResult::Recorded(use_row) => Ok(use_row),
        RedemptionResult::AlreadyUsed => Err(PromoRejection::AlreadyUsed),
        RedemptionResult::Exhausted => Err(PromoRejection::ExhaustedUses),
        RedemptionResult::UnknownCode => Err(PromoRejection::NotFound),
    })
}
