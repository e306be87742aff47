use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Subscription,
    OneTime,
    Refund,
}

/// Ledger metadata, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_code_id: Option<String>,
    /// "card", "cash", "promo_code", or whatever the gateway reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: String,
    pub subscription_id: Option<String>,
    pub user_id: String,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    pub gateway_provider: String,
    pub gateway_transaction_id: Option<String>,
    pub amount: i64,
    pub net_amount: i64,
    pub paid_at: Option<i64>,
    pub metadata: TransactionMetadata,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub subscription_id: Option<String>,
    pub user_id: String,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    pub gateway_provider: String,
    pub gateway_transaction_id: Option<String>,
    pub amount: i64,
    pub net_amount: i64,
    pub paid_at: Option<i64>,
    pub metadata: TransactionMetadata,
}
