//! Subscription activation and promo pricing.
//!
//! - `discount`: pure price arithmetic
//! - `ledger`: promo eligibility and at-most-once redemption
//! - `checkout`: builds a payable order for the gateway
//! - `activation`: the post-payment saga
//! - `admin`: payment-free grant and revoke
//! - `premium`: the premium-flag projection and its reconciliation
//! - `settlement`: read-only channel classification

pub mod activation;
pub mod admin;
pub mod checkout;
pub mod discount;
pub mod ledger;
pub mod premium;
pub mod settlement;

pub use activation::{
    Activation, ActivationError, ActivationRequest, BillingAuth, PaymentAuthorization,
    SubscriptionActivator,
};
pub use admin::{AdminOverrideActivator, Grant, MAX_GRANT_DAYS, Revocation};
pub use checkout::{CheckoutSession, CheckoutSessionBuilder, CheckoutUrls, DiscountSummary};
pub use discount::{DiscountError, DiscountOutcome, apply_discount};
pub use ledger::{
    EligibilityResult, EligiblePromo, check_eligibility, recheck_for_order, record_use,
};
pub use premium::{ReconcileReport, reconcile_premium_flags};
pub use settlement::{Settlement, SettlementChannel, SettlementTotals, classify, get_settlement};
