use serde::{Deserialize, Serialize};

use super::PlanType;

/// A checkout intent created before the user is sent to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutOrder {
    pub order_id: String,
    pub user_id: String,
    pub plan_type: PlanType,
    pub base_amount: i64,
    pub final_amount: i64,
    pub promo_code_id: Option<String>,
    pub free_trial_days: Option<i64>,
    pub created_at: i64,
}

/// Idempotency record: one row per activated order id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderActivation {
    pub order_id: String,
    pub user_id: String,
    pub plan_type: PlanType,
    pub amount: i64,
    pub promo_code_id: Option<String>,
    pub subscription_id: String,
    pub created_at: i64,
}

impl OrderActivation {
    /// Whether a replayed activation carries the same parameters as the original.
    pub fn matches(
        &self,
        user_id: &str,
        plan_type: PlanType,
        amount: i64,
        promo_code_id: Option<&str>,
    ) -> bool {
        self.user_id == user_id
            && self.plan_type == plan_type
            && self.amount == amount
            && self.promo_code_id.as_deref() == promo_code_id
    }
}
