use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::billing::{EligibilityResult, check_eligibility};
use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::middleware::CurrentUser;
use crate::models::{DiscountType, PlanType};

#[derive(Debug, Deserialize)]
pub struct ValidatePromoQuery {
    pub code: String,
    pub plan_type: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatePromoResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_trial_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Read-only preview of a promo code. Nothing is reserved.
pub async fn validate_promo_code(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ValidatePromoQuery>,
) -> Result<Json<ValidatePromoResponse>> {
    let plan_type = PlanType::parse(&query.plan_type)?;
    let base_price = state.prices.price_for(plan_type);

    let conn = state.db.get()?;
    let result = check_eligibility(
        &conn,
        &query.code,
        plan_type,
        user.user_id(),
        base_price,
        queries::now(),
    )?;

    let response = match result {
        EligibilityResult::Eligible(eligible) => ValidatePromoResponse {
            valid: true,
            discount_type: Some(eligible.promo.discount_type),
            discount_value: Some(eligible.promo.discount_value),
            final_amount: Some(eligible.discount.final_price),
            free_trial_days: eligible.discount.free_trial_days,
            reason: None,
            message: None,
        },
        EligibilityResult::Rejected(reason) => ValidatePromoResponse {
            valid: false,
            discount_type: None,
            discount_value: None,
            final_amount: None,
            free_trial_days: None,
            reason: Some(reason.code()),
            message: Some(reason.message()),
        },
    };

    Ok(Json(response))
}
