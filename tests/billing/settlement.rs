use crate::common::*;

fn insert_tx(ctx: &TestContext, order_id: &str, amount: i64, paid_at: i64, method: &str, promo: Option<&str>) {
    queries::insert_payment_transaction(
        &ctx.conn(),
        &NewPaymentTransaction {
            subscription_id: None,
            user_id: "user-1".into(),
            status: TransactionStatus::Completed,
            transaction_type: TransactionType::Subscription,
            gateway_provider: "fake".into(),
            gateway_transaction_id: Some(format!("tx_{}", order_id)),
            amount,
            net_amount: amount,
            paid_at: Some(paid_at),
            metadata: TransactionMetadata {
                order_id: Some(order_id.into()),
                promo_code_id: promo.map(String::from),
                payment_method: Some(method.into()),
                discount_amount: None,
            },
        },
    )
    .unwrap();
}

fn seed(ctx: &TestContext) {
    insert_tx(ctx, "ord_card", 9900, 1_000, "card", None);
    insert_tx(ctx, "ord_cash", 99000, 2_000, "cash", None);
    insert_tx(ctx, "ord_promo", 7920, 3_000, "card", Some("promo-1"));
    insert_tx(ctx, "ord_free", 0, 4_000, "promo_code", None);
}

#[test]
fn test_settlement_partitions_all_transactions() {
    let ctx = TestContext::new();
    seed(&ctx);

    let s = get_settlement(&ctx.conn(), None, None, None).unwrap();

    assert_eq!(s.all.len(), 4);
    assert_eq!(s.card.len() + s.cash.len() + s.promo_code_only.len(), s.all.len());
    assert_eq!(s.card.len(), 1);
    assert_eq!(s.cash.len(), 1);
    assert_eq!(s.promo_code_only.len(), 2);
    assert_eq!(s.totals.all, 9900 + 99000 + 7920);
}

#[test]
fn test_settlement_date_range_is_half_open() {
    let ctx = TestContext::new();
    seed(&ctx);

    let s = get_settlement(&ctx.conn(), Some(2_000), Some(4_000), None).unwrap();
    let ids: Vec<_> = s.all.iter().filter_map(|t| t.metadata.order_id.clone()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"ord_cash".to_string()));
    assert!(ids.contains(&"ord_promo".to_string()));
}

#[test]
fn test_settlement_channel_filter() {
    let ctx = TestContext::new();
    seed(&ctx);

    let s = get_settlement(&ctx.conn(), None, None, Some(SettlementChannel::Cash)).unwrap();
    assert_eq!(s.all.len(), 1);
    assert_eq!(s.cash.len(), 1);
    assert!(s.card.is_empty() && s.promo_code_only.is_empty());
}

#[test]
fn test_settlement_excludes_refunded_and_does_not_mutate() {
    let ctx = TestContext::new();
    seed(&ctx);
    let tx = queries::get_transaction_by_order_id(&ctx.conn(), "ord_card").unwrap().unwrap();
    assert!(queries::mark_transaction_refunded(&ctx.conn(), &tx.id).unwrap());
    assert!(!queries::mark_transaction_refunded(&ctx.conn(), &tx.id).unwrap());

    let before = count_rows(&ctx, "payment_transactions");
    let s = get_settlement(&ctx.conn(), None, None, None).unwrap();
    assert_eq!(s.all.len(), 3);
    assert!(s.card.is_empty());
    assert_eq!(count_rows(&ctx, "payment_transactions"), before);
}

#[test]
fn test_settlement_rejects_inverted_range() {
    let ctx = TestContext::new();
    let err = get_settlement(&ctx.conn(), Some(10), Some(5), None).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
