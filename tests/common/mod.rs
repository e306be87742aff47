//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use jwt_simple::prelude::Duration;
use tempfile::TempDir;

pub use premium_billing::billing::*;
pub use premium_billing::db::{AppState, DbPool, queries};
pub use premium_billing::error::{AppError, GatewayError, PromoRejection};
pub use premium_billing::models::*;
pub use premium_billing::payments::*;

use premium_billing::auth::IdentityVerifier;
use premium_billing::crypto::MasterKey;

pub const IDENTITY_SECRET: &[u8] = b"test-identity-secret";
pub const DAY: i64 = 86400;

/// In-process stand-in for the payment gateway.
#[derive(Default)]
pub struct FakeGateway {
    pub decline_confirm: AtomicBool,
    pub fail_billing_key: AtomicBool,
    pub fail_checkout: AtomicBool,
    /// Confirm with a non-DONE status instead of an error body.
    pub not_done: AtomicBool,
    pub checkout_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub billing_key_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> &'static str {
        "fake"
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutHandle, GatewayError> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(CheckoutHandle {
            checkout_url: format!("https://pay.example.test/checkout/{}", request.order_id),
        })
    }

    async fn confirm_payment(
        &self,
        payment_key: &str,
        _order_id: &str,
        _amount: i64,
    ) -> Result<PaymentConfirmation, GatewayError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if self.decline_confirm.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined {
                code: "REJECT_CARD_COMPANY".into(),
                message: "Card rejected".into(),
            });
        }
        let status = if self.not_done.load(Ordering::SeqCst) {
            PaymentStatus::Failed
        } else {
            PaymentStatus::Done
        };
        Ok(PaymentConfirmation {
            status,
            approved_at: Some(queries::now()),
            gateway_transaction_id: format!("tx_{}", payment_key),
            method: Some("card".into()),
        })
    }

    async fn issue_billing_key(
        &self,
        customer_key: &str,
        _auth_key: &str,
    ) -> Result<BillingKeyIssue, GatewayError> {
        self.billing_key_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_billing_key.load(Ordering::SeqCst) {
            return Err(GatewayError::BillingKeyIssuance("INVALID_CARD: expired".into()));
        }
        Ok(BillingKeyIssue {
            billing_key: format!("bk_{}", customer_key),
            card_last_four: Some("4242".into()),
            card_issuer: Some("Shinhan".into()),
            card_type: Some("credit".into()),
        })
    }
}

pub struct TestContext {
    _dir: TempDir,
    pub pool: DbPool,
    pub gateway: Arc<FakeGateway>,
    pub master_key: MasterKey,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = premium_billing::db::create_pool(dir.path().join("test.db"), 8).unwrap();
        let gateway = FakeGateway::new();
        let master_key = MasterKey::generate();

        let state = AppState {
            db: pool.clone(),
            gateway: gateway.clone(),
            master_key: master_key.clone(),
            identity: IdentityVerifier::new(IDENTITY_SECRET),
            prices: PlanPrices::default(),
            checkout_urls: CheckoutUrls {
                success_url: "https://app.example.test/checkout/success".into(),
                fail_url: "https://app.example.test/checkout/fail".into(),
            },
        };

        Self {
            _dir: dir,
            pool,
            gateway,
            master_key,
            state,
        }
    }

    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.pool.get().unwrap()
    }

    pub fn activator(&self) -> SubscriptionActivator {
        self.state.activator()
    }

    pub fn admin(&self) -> AdminOverrideActivator {
        self.state.admin()
    }

    pub fn checkout(&self) -> CheckoutSessionBuilder {
        self.state.checkout_builder()
    }

    pub fn app(&self) -> axum::Router {
        premium_billing::app(self.state.clone())
    }

    pub fn user_token(&self, user_id: &str) -> String {
        self.state
            .identity
            .sign(user_id, false, Duration::from_mins(10))
            .unwrap()
    }

    pub fn admin_token(&self, user_id: &str) -> String {
        self.state
            .identity
            .sign(user_id, true, Duration::from_mins(10))
            .unwrap()
    }

    /// Simulate a storage failure for one saga step.
    pub fn drop_table(&self, table: &str) {
        self.conn()
            .execute_batch(&format!("DROP TABLE {}", table))
            .unwrap();
    }
}

/// A promo code valid from yesterday until next month, for all plans.
pub fn promo_input(code: &str, discount_type: DiscountType, discount_value: i64) -> CreatePromoCode {
    let now = queries::now();
    CreatePromoCode {
        code: code.to_string(),
        discount_type,
        discount_value,
        max_uses: None,
        valid_from: now - DAY,
        valid_until: now + 30 * DAY,
        applicable_plans: None,
        new_users_only: false,
        description: None,
    }
}

pub fn create_promo(ctx: &TestContext, input: CreatePromoCode) -> PromoCode {
    let code = premium_billing::util::normalize_promo_code(&input.code).unwrap();
    queries::create_promo_code(&ctx.conn(), &code, &input).unwrap()
}

pub fn done_authorization() -> PaymentAuthorization {
    PaymentAuthorization {
        status: PaymentStatus::Done,
        gateway_transaction_id: Some("tx_test".into()),
        approved_at: Some(queries::now()),
        method: Some("card".into()),
        billing_auth: Some(BillingAuth {
            customer_key: "cus_test".into(),
            auth_key: "auth_test".into(),
        }),
    }
}

pub fn activation_request(
    order_id: &str,
    user_id: &str,
    plan_type: PlanType,
    amount: i64,
    promo_code_id: Option<&str>,
) -> ActivationRequest {
    ActivationRequest {
        order_id: order_id.to_string(),
        user_id: user_id.to_string(),
        plan_type,
        amount,
        promo_code_id: promo_code_id.map(String::from),
        authorization: done_authorization(),
    }
}

pub fn count_rows(ctx: &TestContext, table: &str) -> i64 {
    ctx.conn()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
