use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::billing::{ActivationRequest, BillingAuth, PaymentAuthorization, recheck_for_order};
use crate::billing::activation::PROMO_CODE_METHOD;
use crate::crypto::customer_key_for;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, ValidationError};
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{PlanType, SagaStep, SubscriptionStatus};
use crate::payments::PaymentStatus;

#[derive(Debug, Deserialize)]
pub struct ConfirmBody {
    pub order_id: String,
    pub amount: i64,
    /// Absent for zero-amount orders, which never reach the gateway.
    #[serde(default)]
    pub payment_key: Option<String>,
    /// Card registration auth key, when the user opted into recurring billing.
    #[serde(default)]
    pub billing_auth_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub subscription_id: String,
    pub order_id: String,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub current_period_end: i64,
    pub replayed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_steps: Vec<SagaStep>,
}

/// Confirm the payment with the gateway, then run activation.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<ConfirmResponse>> {
    let user_id = user.user_id();

    let (order, already_activated) = {
        let conn = state.db.get()?;
        let order = queries::get_checkout_order(&conn, &body.order_id)?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
        let activated = queries::get_order_activation(&conn, &body.order_id)?.is_some();

        // Nothing was reserved at checkout. Reject before the gateway captures
        // anything; replays already hold their use.
        if let (false, Some(promo_code_id)) = (activated, order.promo_code_id.as_deref()) {
            if let Some(reason) =
                recheck_for_order(&conn, promo_code_id, order.plan_type, user_id, queries::now())?
            {
                tracing::warn!(
                    order_id = %order.order_id,
                    user_id,
                    promo_code_id,
                    reason = reason.code(),
                    "Promo code no longer eligible at confirmation"
                );
                return Err(ValidationError::Ineligible(reason).into());
            }
        }

        (order, activated)
    };

    if body.amount != order.final_amount {
        tracing::error!(
            order_id = %order.order_id,
            user_id,
            expected = order.final_amount,
            got = body.amount,
            "Confirm amount does not match checkout order"
        );
        return Err(AppError::ConsistencyViolation(
            "Amount does not match the checkout order".into(),
        ));
    }

    let authorization = if already_activated {
        // The gateway already settled this order; activation will replay.
        PaymentAuthorization {
            status: PaymentStatus::Done,
            gateway_transaction_id: None,
            approved_at: None,
            method: None,
            billing_auth: None,
        }
    } else if order.final_amount == 0 {
        PaymentAuthorization {
            status: PaymentStatus::Done,
            gateway_transaction_id: None,
            approved_at: Some(queries::now()),
            method: Some(PROMO_CODE_METHOD.to_string()),
            billing_auth: billing_auth(user_id, body.billing_auth_key.as_deref()),
        }
    } else {
        let payment_key = body
            .payment_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::BadRequest("payment_key is required".into()))?;

        let confirmation = state
            .gateway
            .confirm_payment(payment_key, &order.order_id, order.final_amount)
            .await?;

        tracing::info!(
            order_id = %order.order_id,
            user_id,
            status = ?confirmation.status,
            "Gateway confirmation received"
        );

        PaymentAuthorization {
            status: confirmation.status,
            gateway_transaction_id: Some(confirmation.gateway_transaction_id),
            approved_at: confirmation.approved_at,
            method: confirmation.method,
            billing_auth: billing_auth(user_id, body.billing_auth_key.as_deref()),
        }
    };

    let activation = state
        .activator()
        .activate(ActivationRequest {
            order_id: order.order_id.clone(),
            user_id: user_id.to_string(),
            plan_type: order.plan_type,
            amount: order.final_amount,
            promo_code_id: order.promo_code_id.clone(),
            authorization,
        })
        .await?;

    let subscription = activation.subscription;
    Ok(Json(ConfirmResponse {
        subscription_id: subscription.id,
        order_id: order.order_id,
        plan_type: subscription.plan_type,
        status: subscription.status,
        current_period_end: subscription.current_period_end,
        replayed: activation.replayed,
        degraded_steps: activation.degraded_steps,
    }))
}

fn billing_auth(user_id: &str, auth_key: Option<&str>) -> Option<BillingAuth> {
    auth_key.filter(|k| !k.is_empty()).map(|auth_key| BillingAuth {
        customer_key: customer_key_for(user_id),
        auth_key: auth_key.to_string(),
    })
}
