use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::DateTime;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{
    BillingKeyIssue, CheckoutHandle, CheckoutRequest, PaymentConfirmation, PaymentGateway,
    PaymentStatus,
};
use crate::error::GatewayError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentRequest<'a> {
    method: &'static str,
    amount: i64,
    order_id: &'a str,
    order_name: &'a str,
    customer_key: &'a str,
    success_url: &'a str,
    fail_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPaymentRequest<'a> {
    payment_key: &'a str,
    order_id: &'a str,
    amount: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueBillingKeyRequest<'a> {
    auth_key: &'a str,
    customer_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    payment_key: String,
    status: String,
    approved_at: Option<String>,
    method: Option<String>,
    checkout: Option<CheckoutInfo>,
}

#[derive(Debug, Deserialize)]
struct CheckoutInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillingKeyResponse {
    billing_key: String,
    card_company: Option<String>,
    card: Option<BillingCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillingCard {
    number: Option<String>,
    card_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

/// Client for the Toss Payments REST API.
#[derive(Debug, Clone)]
pub struct TossPaymentsClient {
    client: Client,
    api_base: String,
    auth_header: String,
}

impl TossPaymentsClient {
    pub fn new(secret_key: &str, api_base: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        // Basic auth: secret key as username, empty password.
        let auth_header = format!("Basic {}", STANDARD.encode(format!("{}:", secret_key)));

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<std::result::Result<T, ErrorResponse>, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Authorization", &self.auth_header)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(
        response: Response,
    ) -> Result<std::result::Result<T, ErrorResponse>, GatewayError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body)
                .map(Ok)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
        } else {
            serde_json::from_str::<ErrorResponse>(&body)
                .map(Err)
                .map_err(|_| GatewayError::InvalidResponse(format!("HTTP {}: {}", status, body)))
        }
    }
}

/// Map the gateway's payment method label onto our settlement channels.
fn normalize_method(method: &str) -> String {
    match method {
        "카드" | "CARD" | "간편결제" | "EASY_PAY" => "card".to_string(),
        "가상계좌" | "VIRTUAL_ACCOUNT" | "계좌이체" | "TRANSFER" => "cash".to_string(),
        other => other.to_lowercase(),
    }
}

fn parse_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Masked card numbers look like `433012******1234`.
fn last_four(number: &str) -> Option<String> {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.len() >= 4).then(|| digits[digits.len() - 4..].iter().collect())
}

#[async_trait]
impl PaymentGateway for TossPaymentsClient {
    fn provider(&self) -> &'static str {
        "tosspayments"
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutHandle, GatewayError> {
        let body = CreatePaymentRequest {
            method: "CARD",
            amount: request.amount,
            order_id: &request.order_id,
            order_name: &request.order_name,
            customer_key: &request.customer_key,
            success_url: &request.success_url,
            fail_url: &request.fail_url,
        };

        let payment: PaymentResponse = self
            .post("/v1/payments", &body)
            .await?
            .map_err(|e| GatewayError::Declined {
                code: e.code,
                message: e.message,
            })?;

        let checkout = payment.checkout.ok_or_else(|| {
            GatewayError::InvalidResponse("Payment response has no checkout URL".into())
        })?;

        Ok(CheckoutHandle {
            checkout_url: checkout.url,
        })
    }

    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: &str,
        amount: i64,
    ) -> Result<PaymentConfirmation, GatewayError> {
        let body = ConfirmPaymentRequest {
            payment_key,
            order_id,
            amount,
        };

        let payment: PaymentResponse = self
            .post("/v1/payments/confirm", &body)
            .await?
            .map_err(|e| GatewayError::Declined {
                code: e.code,
                message: e.message,
            })?;

        let status = if payment.status == "DONE" {
            PaymentStatus::Done
        } else {
            PaymentStatus::Failed
        };

        Ok(PaymentConfirmation {
            status,
            approved_at: payment.approved_at.as_deref().and_then(parse_timestamp),
            gateway_transaction_id: payment.payment_key,
            method: payment.method.as_deref().map(normalize_method),
        })
    }

    async fn issue_billing_key(
        &self,
        customer_key: &str,
        auth_key: &str,
    ) -> Result<BillingKeyIssue, GatewayError> {
        let body = IssueBillingKeyRequest {
            auth_key,
            customer_key,
        };

        let issued: BillingKeyResponse = self
            .post("/v1/billing/authorizations/issue", &body)
            .await?
            .map_err(|e| GatewayError::BillingKeyIssuance(format!("{}: {}", e.code, e.message)))?;

        let card = issued.card;
        Ok(BillingKeyIssue {
            billing_key: issued.billing_key,
            card_last_four: card.as_ref().and_then(|c| c.number.as_deref()).and_then(last_four),
            card_issuer: issued.card_company,
            card_type: card.and_then(|c| c.card_type),
        })
    }
}
