use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Saga step names, as logged and as stored on follow-ups.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SagaStep {
    GatewayConfirmed,
    IssueBillingKey,
    CreateSubscription,
    LogTransaction,
    UpdatePremiumFlag,
    RecordPromoUse,
}

/// Something an operator (or the reconciler) must look at after a saga run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFollowup {
    pub id: String,
    pub order_id: Option<String>,
    pub user_id: String,
    pub step: SagaStep,
    pub detail: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}
