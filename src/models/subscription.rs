use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::PlanType;
use crate::crypto::{BILLING_KEY_PURPOSE, MasterKey};
use crate::error::Result;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    AdminGranted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub plan_type: PlanType,
    /// Recurring-billing token, encrypted at rest. None for admin grants.
    #[serde(skip_serializing, default)]
    pub billing_key_encrypted: Option<Vec<u8>>,
    pub payment_method: PaymentMethod,
    pub card_last_four: Option<String>,
    pub card_issuer: Option<String>,
    pub started_at: i64,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub price_per_month: i64,
    pub total_paid: i64,
    /// Checkout order that produced this subscription (None for admin grants)
    pub order_id: Option<String>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn has_billing_key(&self) -> bool {
        self.billing_key_encrypted.is_some()
    }

    /// Decrypt the stored billing key, if any.
    pub fn decrypt_billing_key(&self, master_key: &MasterKey) -> Result<Option<String>> {
        let Some(ciphertext) = &self.billing_key_encrypted else {
            return Ok(None);
        };
        let plaintext = master_key.decrypt(BILLING_KEY_PURPOSE, ciphertext)?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| crate::error::AppError::Internal("Billing key is not valid UTF-8".into()))
    }
}

/// Card details returned alongside a freshly issued billing key.
#[derive(Debug, Clone, Default)]
pub struct CardDetails {
    pub last_four: Option<String>,
    pub issuer: Option<String>,
}

/// Everything needed to insert a subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: String,
    pub plan_type: PlanType,
    pub billing_key_encrypted: Option<Vec<u8>>,
    pub payment_method: PaymentMethod,
    pub card: CardDetails,
    pub started_at: i64,
    pub current_period_end: i64,
    pub price_per_month: i64,
    pub total_paid: i64,
    pub order_id: Option<String>,
}
