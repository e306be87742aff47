use std::sync::Arc;

use premium_billing::crypto::BILLING_KEY_PURPOSE;

use crate::common::*;

async fn checkout(ctx: &TestContext, user: &str, plan: PlanType, promo: Option<&str>) -> CheckoutSession {
    ctx.checkout()
        .create_checkout(&ctx.pool, user, plan, promo)
        .await
        .unwrap()
}

fn open_steps(ctx: &TestContext) -> Vec<SagaStep> {
    queries::list_open_followups(&ctx.conn())
        .unwrap()
        .into_iter()
        .map(|f| f.step)
        .collect()
}

#[tokio::test]
async fn test_activation_creates_subscription_ledger_and_flag() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;

    let activation = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None))
        .await
        .unwrap();

    assert!(!activation.replayed);
    assert!(activation.degraded_steps.is_empty());

    let sub = &activation.subscription;
    assert!(sub.is_active());
    assert_eq!(sub.payment_method, PaymentMethod::Card);
    assert_eq!(sub.current_period_end, sub.started_at + 30 * DAY);
    assert_eq!(sub.price_per_month, 9900);
    assert_eq!(sub.total_paid, 9900);
    assert_eq!(sub.card_last_four.as_deref(), Some("4242"));
    assert_eq!(
        sub.decrypt_billing_key(&ctx.master_key).unwrap().as_deref(),
        Some("bk_cus_test")
    );

    // Stored ciphertext, never the raw key.
    let stored = queries::get_subscription_by_id(&ctx.conn(), &sub.id).unwrap().unwrap();
    let raw = stored.billing_key_encrypted.unwrap();
    assert_ne!(raw, b"bk_cus_test".to_vec());
    assert_eq!(ctx.master_key.decrypt(BILLING_KEY_PURPOSE, &raw).unwrap(), b"bk_cus_test");

    let tx = queries::get_transaction_by_order_id(&ctx.conn(), &session.order_id)
        .unwrap()
        .unwrap();
    assert_eq!(tx.subscription_id.as_deref(), Some(sub.id.as_str()));
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.gateway_provider, "fake");
    assert_eq!(tx.metadata.payment_method.as_deref(), Some("card"));

    let account = queries::get_user_account(&ctx.conn(), "user-1").unwrap().unwrap();
    assert!(account.is_premium);
    assert_eq!(account.premium_expires_at, Some(sub.current_period_end));
    assert!(open_steps(&ctx).is_empty());
}

#[tokio::test]
async fn test_yearly_price_per_month() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Yearly, None).await;

    let activation = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Yearly, 99000, None))
        .await
        .unwrap();

    let sub = activation.subscription;
    assert_eq!(sub.current_period_end, sub.started_at + 365 * DAY);
    assert_eq!(sub.price_per_month, 8250);
    assert_eq!(sub.total_paid, 99000);
}

#[tokio::test]
async fn test_activation_is_idempotent_on_order_id() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    let activator = ctx.activator();
    let request = activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None);

    let first = activator.activate(request.clone()).await.unwrap();
    let second = activator.activate(request).await.unwrap();

    assert_eq!(first.subscription.id, second.subscription.id);
    assert!(second.replayed);
    assert_eq!(count_rows(&ctx, "subscriptions"), 1);
    assert_eq!(count_rows(&ctx, "payment_transactions"), 1);
    assert_eq!(FakeGateway::count(&ctx.gateway.billing_key_calls), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activations_create_one_subscription() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    let activator = Arc::new(ctx.activator());

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let activator = activator.clone();
            let request = activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None);
            tokio::spawn(async move { activator.activate(request).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().subscription.id);
    }
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(count_rows(&ctx, "subscriptions"), 1);
    assert_eq!(count_rows(&ctx, "order_activations"), 1);
    assert_eq!(count_rows(&ctx, "payment_transactions"), 1);
}

#[tokio::test]
async fn test_replay_with_different_parameters_is_a_consistency_violation() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    let activator = ctx.activator();

    activator
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None))
        .await
        .unwrap();

    let err = activator
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 100, None))
        .await
        .unwrap_err();

    assert!(matches!(err, ActivationError::ConsistencyViolation(_)));
    assert_eq!(count_rows(&ctx, "subscriptions"), 1);
}

#[tokio::test]
async fn test_activation_must_match_checkout_order() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Yearly, None).await;

    let err = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Yearly, 9900, None))
        .await
        .unwrap_err();

    assert!(matches!(err, ActivationError::ConsistencyViolation(_)));

    let err = ctx
        .activator()
        .activate(activation_request(&session.order_id, "intruder", PlanType::Yearly, 99000, None))
        .await
        .unwrap_err();

    assert!(matches!(err, ActivationError::ConsistencyViolation(_)));
    assert_eq!(count_rows(&ctx, "subscriptions"), 0);
    assert_eq!(FakeGateway::count(&ctx.gateway.billing_key_calls), 0);
}

#[tokio::test]
async fn test_unapproved_payment_aborts_without_writes() {
    let ctx = TestContext::new();
    let mut request = activation_request("ord_declined", "user-1", PlanType::Monthly, 9900, None);
    request.authorization.status = PaymentStatus::Failed;

    let err = ctx.activator().activate(request).await.unwrap_err();

    assert!(matches!(err, ActivationError::PaymentDeclined));
    assert_eq!(FakeGateway::count(&ctx.gateway.billing_key_calls), 0);
    assert_eq!(count_rows(&ctx, "subscriptions"), 0);
    assert_eq!(count_rows(&ctx, "saga_followups"), 0);
}

#[tokio::test]
async fn test_billing_key_failure_aborts_and_flags_refund_review() {
    let ctx = TestContext::new();
    FakeGateway::set(&ctx.gateway.fail_billing_key, true);
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;

    let err = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None))
        .await
        .unwrap_err();

    assert!(matches!(err, ActivationError::GatewaySetupFailed(_)));
    assert_eq!(count_rows(&ctx, "subscriptions"), 0);
    assert_eq!(open_steps(&ctx), vec![SagaStep::IssueBillingKey]);

    let app_err: AppError = err.into();
    assert!(matches!(app_err, AppError::Gateway(GatewayError::BillingKeyIssuance(_))));
}

#[tokio::test]
async fn test_no_billing_auth_skips_key_issuance() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    let mut request = activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None);
    request.authorization.billing_auth = None;

    let activation = ctx.activator().activate(request).await.unwrap();

    assert!(!activation.subscription.has_billing_key());
    assert_eq!(FakeGateway::count(&ctx.gateway.billing_key_calls), 0);
}

#[tokio::test]
async fn test_subscription_write_failure_is_fatal_and_recorded() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    ctx.drop_table("subscriptions");

    let err = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None))
        .await
        .unwrap_err();

    match err {
        ActivationError::SubscriptionCreationFailed { order_id } => assert_eq!(order_id, session.order_id),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(open_steps(&ctx), vec![SagaStep::CreateSubscription]);
    assert_eq!(count_rows(&ctx, "order_activations"), 0);
}

#[tokio::test]
async fn test_ledger_failure_does_not_fail_activation() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    ctx.drop_table("payment_transactions");

    let activation = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None))
        .await
        .unwrap();

    assert!(activation.subscription.is_active());
    assert_eq!(activation.degraded_steps, vec![SagaStep::LogTransaction]);
    assert_eq!(open_steps(&ctx), vec![SagaStep::LogTransaction]);

    // Later steps still ran.
    let account = queries::get_user_account(&ctx.conn(), "user-1").unwrap().unwrap();
    assert!(account.is_premium);
}

#[tokio::test]
async fn test_premium_flag_failure_does_not_fail_activation() {
    let ctx = TestContext::new();
    let session = checkout(&ctx, "user-1", PlanType::Monthly, None).await;
    ctx.drop_table("user_accounts");

    let activation = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Monthly, 9900, None))
        .await
        .unwrap();

    assert_eq!(activation.degraded_steps, vec![SagaStep::UpdatePremiumFlag]);
    assert_eq!(count_rows(&ctx, "payment_transactions"), 1);
}

#[tokio::test]
async fn test_promo_use_is_recorded_against_the_subscription() {
    let ctx = TestContext::new();
    let promo = create_promo(&ctx, promo_input("SAVE3000", DiscountType::FixedAmount, 3000));
    let session = checkout(&ctx, "user-1", PlanType::Monthly, Some("SAVE3000")).await;
    assert_eq!(session.final_amount, 6900);

    let activation = ctx
        .activator()
        .activate(activation_request(
            &session.order_id,
            "user-1",
            PlanType::Monthly,
            6900,
            Some(&promo.id),
        ))
        .await
        .unwrap();

    let uses = queries::list_promo_code_uses(&ctx.conn(), &promo.id).unwrap();
    assert_eq!(uses.len(), 1);
    assert_eq!(uses[0].subscription_id.as_deref(), Some(activation.subscription.id.as_str()));

    let tx = queries::get_transaction_by_order_id(&ctx.conn(), &session.order_id)
        .unwrap()
        .unwrap();
    assert_eq!(tx.metadata.promo_code_id.as_deref(), Some(promo.id.as_str()));
    assert_eq!(tx.metadata.discount_amount, Some(3000));
}

#[tokio::test]
async fn test_exhausted_promo_at_activation_degrades_but_succeeds() {
    let ctx = TestContext::new();
    let mut input = promo_input("ONESHOT", DiscountType::Percentage, 20);
    input.max_uses = Some(1);
    let promo = create_promo(&ctx, input);

    // Both users price their order while the code still has a use left.
    let first = checkout(&ctx, "user-1", PlanType::Monthly, Some("ONESHOT")).await;
    let second = checkout(&ctx, "user-2", PlanType::Monthly, Some("ONESHOT")).await;

    let activator = ctx.activator();
    activator
        .activate(activation_request(&first.order_id, "user-1", PlanType::Monthly, 7920, Some(&promo.id)))
        .await
        .unwrap();
    let late = activator
        .activate(activation_request(&second.order_id, "user-2", PlanType::Monthly, 7920, Some(&promo.id)))
        .await
        .unwrap();

    assert!(late.subscription.is_active());
    assert_eq!(late.degraded_steps, vec![SagaStep::RecordPromoUse]);

    let promo = queries::get_promo_code_by_id(&ctx.conn(), &promo.id).unwrap().unwrap();
    assert_eq!(promo.current_uses, 1);
}

#[tokio::test]
async fn test_free_trial_activation_uses_trial_period() {
    let ctx = TestContext::new();
    let promo = create_promo(&ctx, promo_input("TRIAL14", DiscountType::FreeTrial, 14));
    let session = checkout(&ctx, "user-1", PlanType::Monthly, Some("TRIAL14")).await;

    let mut request = activation_request(&session.order_id, "user-1", PlanType::Monthly, 0, Some(&promo.id));
    request.authorization.gateway_transaction_id = None;
    request.authorization.method = None;

    let activation = ctx.activator().activate(request).await.unwrap();
    let sub = activation.subscription;
    assert_eq!(sub.current_period_end, sub.started_at + 14 * DAY);
    assert_eq!(sub.total_paid, 0);

    let tx = queries::get_transaction_by_order_id(&ctx.conn(), &session.order_id)
        .unwrap()
        .unwrap();
    assert_eq!(tx.metadata.payment_method.as_deref(), Some("promo_code"));
    assert_eq!(tx.gateway_provider, "none");
}

#[tokio::test]
async fn test_paid_activation_supersedes_admin_grant() {
    let ctx = TestContext::new();
    let grant = ctx.admin().grant("admin-1", "user-1", PlanType::Monthly, Some(7)).unwrap();
    let session = checkout(&ctx, "user-1", PlanType::Yearly, None).await;

    let activation = ctx
        .activator()
        .activate(activation_request(&session.order_id, "user-1", PlanType::Yearly, 99000, None))
        .await
        .unwrap();

    let old = queries::get_subscription_by_id(&ctx.conn(), &grant.subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(old.status, SubscriptionStatus::Cancelled);

    let active = queries::get_active_subscription(&ctx.conn(), "user-1").unwrap().unwrap();
    assert_eq!(active.id, activation.subscription.id);
}
