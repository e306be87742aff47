use std::sync::Arc;

use serde::Serialize;

use super::ledger::check_eligibility;
use crate::crypto::customer_key_for;
use crate::db::{DbPool, queries};
use crate::error::Result;
use crate::models::{CheckoutOrder, DiscountType, PlanPrices, PlanType};
use crate::payments::{CheckoutRequest, PaymentGateway};
use crate::util::generate_order_id;

/// Where the gateway sends the user after checkout.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub fail_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscountSummary {
    pub promo_code_id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub discount_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_trial_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub order_id: String,
    pub checkout_url: String,
    pub base_amount: i64,
    pub final_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_summary: Option<DiscountSummary>,
}

pub struct CheckoutSessionBuilder {
    gateway: Arc<dyn PaymentGateway>,
    prices: PlanPrices,
    urls: CheckoutUrls,
}

impl CheckoutSessionBuilder {
    pub fn new(gateway: Arc<dyn PaymentGateway>, prices: PlanPrices, urls: CheckoutUrls) -> Self {
        Self {
            gateway,
            prices,
            urls,
        }
    }

    /// Price an order and obtain a checkout handle for it.
    ///
    /// An ineligible promo code fails the whole call with its rejection
    /// reason. Nothing is reserved: the code is only consumed on activation.
    pub async fn create_checkout(
        &self,
        pool: &DbPool,
        user_id: &str,
        plan_type: PlanType,
        promo_code: Option<&str>,
    ) -> Result<CheckoutSession> {
        let base_amount = self.prices.price_for(plan_type);
        let order_id = generate_order_id(user_id);
        let now = queries::now();

        let (summary, final_amount) = {
            let conn = pool.get()?;

            let summary = match promo_code {
                Some(raw) => {
                    let eligible = check_eligibility(&conn, raw, plan_type, user_id, base_amount, now)?
                        .into_eligible()?;
                    Some(DiscountSummary {
                        promo_code_id: eligible.promo.id,
                        code: eligible.promo.code,
                        discount_type: eligible.promo.discount_type,
                        discount_value: eligible.promo.discount_value,
                        discount_amount: eligible.discount.discount_amount,
                        free_trial_days: eligible.discount.free_trial_days,
                    })
                }
                None => None,
            };

            let final_amount = base_amount - summary.as_ref().map_or(0, |s| s.discount_amount);

            queries::create_checkout_order(
                &conn,
                &CheckoutOrder {
                    order_id: order_id.clone(),
                    user_id: user_id.to_string(),
                    plan_type,
                    base_amount,
                    final_amount,
                    promo_code_id: summary.as_ref().map(|s| s.promo_code_id.clone()),
                    free_trial_days: summary.as_ref().and_then(|s| s.free_trial_days),
                    created_at: now,
                },
            )?;

            (summary, final_amount)
        };

        // The gateway refuses zero-amount charges; send the user straight to
        // the success page so the client can confirm without a payment key.
        let checkout_url = if final_amount == 0 {
            format!(
                "{}?orderId={}&amount=0",
                self.urls.success_url,
                urlencoding::encode(&order_id)
            )
        } else {
            let request = CheckoutRequest {
                order_id: order_id.clone(),
                order_name: plan_type.order_name().to_string(),
                amount: final_amount,
                customer_key: customer_key_for(user_id),
                success_url: self.urls.success_url.clone(),
                fail_url: self.urls.fail_url.clone(),
            };
            self.gateway.create_checkout(&request).await?.checkout_url
        };

        tracing::info!(
            order_id = %order_id,
            user_id = %user_id,
            plan_type = %plan_type,
            base_amount,
            final_amount,
            "Checkout created"
        );

        Ok(CheckoutSession {
            order_id,
            checkout_url,
            base_amount,
            final_amount,
            discount_summary: summary,
        })
    }
}
