//! The post-payment activation saga.
//!
//! Steps run in a fixed order and never roll back:
//!
//! 1. gateway confirmed (precondition, no writes)
//! 2. issue billing key (gateway round trip, before any write)
//! 3. create subscription: fatal on failure
//! 4. log transaction: non-fatal
//! 5. update premium flag: non-fatal
//! 6. record promo use: non-fatal
//!
//! Non-fatal failures are logged with the order id and step name and stored
//! as `saga_followups` rows for manual or reconciler follow-up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ledger;
use crate::crypto::{BILLING_KEY_PURPOSE, MasterKey};
use crate::db::queries::{self, OrderSubscriptionResult};
use crate::db::DbPool;
use crate::error::{AppError, GatewayError};
use crate::models::*;
use crate::payments::{PaymentGateway, PaymentStatus};

/// Ledger payment method for orders settled entirely by a promo code.
pub const PROMO_CODE_METHOD: &str = "promo_code";

/// Gateway provider recorded when no gateway was involved.
const NO_GATEWAY_PROVIDER: &str = "none";

/// Recurring-billing authorization handed back by the gateway's card
/// registration flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAuth {
    pub customer_key: String,
    pub auth_key: String,
}

/// The caller's record of its own gateway round trip.
#[derive(Debug, Clone)]
pub struct PaymentAuthorization {
    pub status: PaymentStatus,
    pub gateway_transaction_id: Option<String>,
    pub approved_at: Option<i64>,
    pub method: Option<String>,
    /// None skips billing-key issuance (one-off payments, free orders).
    pub billing_auth: Option<BillingAuth>,
}

#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub order_id: String,
    pub user_id: String,
    pub plan_type: PlanType,
    pub amount: i64,
    pub promo_code_id: Option<String>,
    pub authorization: PaymentAuthorization,
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub subscription: Subscription,
    /// True when the order had already been activated.
    pub replayed: bool,
    /// Non-fatal steps that failed during this run.
    pub degraded_steps: Vec<SagaStep>,
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Payment was not approved by the gateway")]
    PaymentDeclined,

    #[error("Billing key issuance failed: {0}")]
    GatewaySetupFailed(String),

    #[error("Subscription creation failed for order {order_id}")]
    SubscriptionCreationFailed { order_id: String },

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Storage or crypto failures before any subscription write.
    #[error(transparent)]
    Aborted(#[from] AppError),
}

impl From<ActivationError> for AppError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::PaymentDeclined => AppError::Gateway(GatewayError::Declined {
                code: "NOT_DONE".into(),
                message: "Payment was not approved".into(),
            }),
            ActivationError::GatewaySetupFailed(msg) => {
                AppError::Gateway(GatewayError::BillingKeyIssuance(msg))
            }
            ActivationError::SubscriptionCreationFailed { order_id } => {
                AppError::SubscriptionCreationFailed { order_id }
            }
            ActivationError::ConsistencyViolation(msg) => AppError::ConsistencyViolation(msg),
            ActivationError::Aborted(e) => e,
        }
    }
}

pub struct SubscriptionActivator {
    pool: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    master_key: MasterKey,
}

impl SubscriptionActivator {
    pub fn new(pool: DbPool, gateway: Arc<dyn PaymentGateway>, master_key: MasterKey) -> Self {
        Self {
            pool,
            gateway,
            master_key,
        }
    }

    /// Activate the subscription for a gateway-confirmed order.
    ///
    /// Idempotent on `order_id`: a repeated call with the same parameters
    /// returns the original subscription; with different parameters it is a
    /// `ConsistencyViolation`.
    pub async fn activate(&self, req: ActivationRequest) -> Result<Activation, ActivationError> {
        let order_id = req.order_id.as_str();
        let user_id = req.user_id.as_str();

        if req.authorization.status != PaymentStatus::Done {
            tracing::warn!(order_id, user_id, "Activation refused: payment not approved");
            return Err(ActivationError::PaymentDeclined);
        }

        let checkout_order = {
            let conn = self.pool.get().map_err(AppError::from)?;

            if let Some(previous) = queries::get_order_activation(&conn, order_id)? {
                return self.replay(&conn, &req, previous);
            }

            let order = queries::get_checkout_order(&conn, order_id)?;
            if let Some(order) = &order {
                Self::check_against_order(&req, order)?;
            }
            order
        };

        // Step 2. No local writes have happened yet, so failure leaves only the
        // captured charge, which is flagged for refund review.
        let (billing_key_encrypted, card) = match &req.authorization.billing_auth {
            Some(auth) => match self
                .gateway
                .issue_billing_key(&auth.customer_key, &auth.auth_key)
                .await
            {
                Ok(issued) => {
                    let sealed = self
                        .master_key
                        .encrypt(BILLING_KEY_PURPOSE, issued.billing_key.as_bytes())?;
                    let card = CardDetails {
                        last_four: issued.card_last_four,
                        issuer: issued.card_issuer,
                    };
                    (Some(sealed), card)
                }
                Err(e) => {
                    tracing::error!(
                        order_id,
                        user_id,
                        step = %SagaStep::IssueBillingKey,
                        error = %e,
                        "Billing key issuance failed after payment confirmation"
                    );
                    self.record_followup(
                        order_id,
                        user_id,
                        SagaStep::IssueBillingKey,
                        &format!("Payment confirmed but billing key issuance failed ({e}); review for refund"),
                    );
                    return Err(ActivationError::GatewaySetupFailed(e.to_string()));
                }
            },
            None => (None, CardDetails::default()),
        };

        // Step 3. A free-trial order supplies the duration override: its period
        // is the trial length, not the plan's.
        let started_at = queries::now();
        let trial_days = checkout_order.as_ref().and_then(|o| o.free_trial_days);
        let new_subscription = NewSubscription {
            user_id: req.user_id.clone(),
            plan_type: req.plan_type,
            billing_key_encrypted,
            payment_method: PaymentMethod::Card,
            card,
            started_at,
            current_period_end: period_end(started_at, req.plan_type, trial_days),
            price_per_month: req.amount / req.plan_type.months(),
            total_paid: req.amount,
            order_id: Some(req.order_id.clone()),
        };

        let created = self.pool.get().map_err(AppError::from).and_then(|mut conn| {
            queries::create_subscription_for_order(
                &mut conn,
                order_id,
                req.amount,
                req.promo_code_id.as_deref(),
                &new_subscription,
            )
        });

        let subscription = match created {
            Ok(OrderSubscriptionResult::Created(subscription)) => subscription,
            Ok(OrderSubscriptionResult::Existing(subscription)) => {
                // Lost a race with a concurrent activation of the same order.
                tracing::info!(order_id, subscription_id = %subscription.id, "Order already activated");
                return Ok(Activation {
                    subscription,
                    replayed: true,
                    degraded_steps: Vec::new(),
                });
            }
            Ok(OrderSubscriptionResult::Conflict(previous)) => {
                return Err(Self::conflict(&req, &previous));
            }
            Err(e) => {
                tracing::error!(
                    order_id,
                    user_id,
                    step = %SagaStep::CreateSubscription,
                    amount = req.amount,
                    error = %e,
                    "Subscription creation failed after payment was captured"
                );
                self.record_followup(
                    order_id,
                    user_id,
                    SagaStep::CreateSubscription,
                    &format!("Payment of {} captured but no subscription exists: {e}", req.amount),
                );
                return Err(ActivationError::SubscriptionCreationFailed {
                    order_id: req.order_id.clone(),
                });
            }
        };

        tracing::info!(
            order_id,
            user_id,
            subscription_id = %subscription.id,
            plan_type = %req.plan_type,
            "Subscription created"
        );

        let mut degraded_steps = Vec::new();

        // Step 4.
        let transaction = self.ledger_entry(&req, &subscription, checkout_order.as_ref());
        if let Err(e) = self
            .pool
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::insert_payment_transaction(&conn, &transaction))
        {
            self.degrade(&mut degraded_steps, &req, SagaStep::LogTransaction, &e.to_string());
        }

        // Step 5.
        if let Err(e) = self
            .pool
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::sync_premium_flag(&conn, user_id, queries::now()))
        {
            self.degrade(&mut degraded_steps, &req, SagaStep::UpdatePremiumFlag, &e.to_string());
        }

        // Step 6.
        if let Some(promo_code_id) = req.promo_code_id.as_deref() {
            let recorded = self.pool.get().map_err(AppError::from).and_then(|mut conn| {
                ledger::record_use(&mut conn, promo_code_id, user_id, Some(&subscription.id))
            });
            match recorded {
                Ok(Ok(_)) => {}
                Ok(Err(reason)) => self.degrade(
                    &mut degraded_steps,
                    &req,
                    SagaStep::RecordPromoUse,
                    &format!("Promo code {promo_code_id} not recorded: {}", reason.code()),
                ),
                Err(e) => {
                    self.degrade(&mut degraded_steps, &req, SagaStep::RecordPromoUse, &e.to_string())
                }
            }
        }

        if degraded_steps.is_empty() {
            tracing::info!(order_id, user_id, "Activation completed");
        } else {
            tracing::warn!(order_id, user_id, ?degraded_steps, "Activation completed with follow-ups");
        }

        Ok(Activation {
            subscription,
            replayed: false,
            degraded_steps,
        })
    }

    fn replay(
        &self,
        conn: &rusqlite::Connection,
        req: &ActivationRequest,
        previous: OrderActivation,
    ) -> Result<Activation, ActivationError> {
        if !previous.matches(&req.user_id, req.plan_type, req.amount, req.promo_code_id.as_deref()) {
            return Err(Self::conflict(req, &previous));
        }

        let subscription = queries::get_subscription_by_id(conn, &previous.subscription_id)?
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "Order {} points at missing subscription {}",
                    previous.order_id, previous.subscription_id
                ))
            })?;

        tracing::info!(
            order_id = %req.order_id,
            subscription_id = %subscription.id,
            "Activation replayed"
        );

        Ok(Activation {
            subscription,
            replayed: true,
            degraded_steps: Vec::new(),
        })
    }

    fn conflict(req: &ActivationRequest, previous: &OrderActivation) -> ActivationError {
        tracing::error!(
            order_id = %req.order_id,
            user_id = %req.user_id,
            previous_user_id = %previous.user_id,
            amount = req.amount,
            previous_amount = previous.amount,
            "Order id reused with different parameters"
        );
        ActivationError::ConsistencyViolation(format!(
            "Order {} was already activated with different parameters",
            req.order_id
        ))
    }

    /// The request must describe the order that was priced at checkout.
    fn check_against_order(req: &ActivationRequest, order: &CheckoutOrder) -> Result<(), ActivationError> {
        let mismatch = if order.user_id != req.user_id {
            Some("user")
        } else if order.plan_type != req.plan_type {
            Some("plan")
        } else if order.final_amount != req.amount {
            Some("amount")
        } else if order.promo_code_id != req.promo_code_id {
            Some("promo code")
        } else {
            None
        };

        match mismatch {
            Some(field) => {
                tracing::error!(
                    order_id = %req.order_id,
                    user_id = %req.user_id,
                    field,
                    "Activation does not match checkout order"
                );
                Err(ActivationError::ConsistencyViolation(format!(
                    "Order {} {} does not match checkout",
                    req.order_id, field
                )))
            }
            None => Ok(()),
        }
    }

    fn ledger_entry(
        &self,
        req: &ActivationRequest,
        subscription: &Subscription,
        order: Option<&CheckoutOrder>,
    ) -> NewPaymentTransaction {
        let auth = &req.authorization;
        let promo_only = req.amount == 0 && req.promo_code_id.is_some();

        let payment_method = if promo_only {
            PROMO_CODE_METHOD.to_string()
        } else {
            auth.method.clone().unwrap_or_else(|| "card".to_string())
        };

        let gateway_provider = if auth.gateway_transaction_id.is_some() {
            self.gateway.provider()
        } else {
            NO_GATEWAY_PROVIDER
        };

        NewPaymentTransaction {
            subscription_id: Some(subscription.id.clone()),
            user_id: req.user_id.clone(),
            status: TransactionStatus::Completed,
            transaction_type: TransactionType::Subscription,
            gateway_provider: gateway_provider.to_string(),
            gateway_transaction_id: auth.gateway_transaction_id.clone(),
            amount: req.amount,
            net_amount: req.amount,
            paid_at: Some(auth.approved_at.unwrap_or(subscription.started_at)),
            metadata: TransactionMetadata {
                order_id: Some(req.order_id.clone()),
                promo_code_id: req.promo_code_id.clone(),
                payment_method: Some(payment_method),
                discount_amount: order.map(|o| o.base_amount - o.final_amount).filter(|d| *d > 0),
            },
        }
    }

    fn degrade(&self, degraded: &mut Vec<SagaStep>, req: &ActivationRequest, step: SagaStep, detail: &str) {
        tracing::error!(
            order_id = %req.order_id,
            user_id = %req.user_id,
            step = %step,
            error = detail,
            "Non-fatal activation step failed"
        );
        degraded.push(step);
        self.record_followup(&req.order_id, &req.user_id, step, detail);
    }

    /// Best effort: a failure here is logged and otherwise ignored.
    fn record_followup(&self, order_id: &str, user_id: &str, step: SagaStep, detail: &str) {
        let result = self
            .pool
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::record_saga_followup(&conn, Some(order_id), user_id, step, detail));

        if let Err(e) = result {
            tracing::error!(order_id, user_id, step = %step, error = %e, "Failed to record saga follow-up");
        }
    }
}
