mod toss;

pub use toss::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// What we ask the gateway to charge for a not-yet-paid order.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub order_id: String,
    pub order_name: String,
    pub amount: i64,
    pub customer_key: String,
    pub success_url: String,
    pub fail_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutHandle {
    pub checkout_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Done,
    Failed,
}

/// The gateway's answer to a payment confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub status: PaymentStatus,
    pub approved_at: Option<i64>,
    pub gateway_transaction_id: String,
    /// Normalized settlement method: "card", "cash", or the gateway's own label
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingKeyIssue {
    pub billing_key: String,
    pub card_last_four: Option<String>,
    pub card_issuer: Option<String>,
    pub card_type: Option<String>,
}

/// The payment gateway, as seen by the billing services.
///
/// Every call is a single round trip; a timeout surfaces as
/// `GatewayError::Transport` before any local write happens.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name recorded on ledger rows.
    fn provider(&self) -> &'static str;

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutHandle, GatewayError>;

    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: &str,
        amount: i64,
    ) -> Result<PaymentConfirmation, GatewayError>;

    async fn issue_billing_key(
        &self,
        customer_key: &str,
        auth_key: &str,
    ) -> Result<BillingKeyIssue, GatewayError>;
}
