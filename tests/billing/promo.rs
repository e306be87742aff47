use std::sync::{Arc, Barrier};
use std::thread;

use crate::common::*;

fn eligibility(ctx: &TestContext, code: &str, plan: PlanType, user: &str) -> EligibilityResult {
    check_eligibility(&ctx.conn(), code, plan, user, 9900, queries::now()).unwrap()
}

fn rejection(result: EligibilityResult) -> PromoRejection {
    match result {
        EligibilityResult::Rejected(reason) => reason,
        EligibilityResult::Eligible(e) => panic!("expected rejection, got eligible {}", e.promo.code),
    }
}

#[test]
fn test_lookup_is_trimmed_and_case_insensitive() {
    let ctx = TestContext::new();
    create_promo(&ctx, promo_input("SPRING20", DiscountType::Percentage, 20));

    match eligibility(&ctx, "  spring20 ", PlanType::Monthly, "user-1") {
        EligibilityResult::Eligible(e) => {
            assert_eq!(e.promo.code, "SPRING20");
            assert_eq!(e.discount.final_price, 7920);
        }
        EligibilityResult::Rejected(r) => panic!("unexpected rejection {:?}", r),
    }
}

#[test]
fn test_unknown_code_is_not_found() {
    let ctx = TestContext::new();
    let reason = rejection(eligibility(&ctx, "NOPE", PlanType::Monthly, "user-1"));
    assert_eq!(reason, PromoRejection::NotFound);
}

#[test]
fn test_malformed_code_is_a_validation_error() {
    let ctx = TestContext::new();
    let result = check_eligibility(&ctx.conn(), "no spaces!", PlanType::Monthly, "user-1", 9900, queries::now());
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[test]
fn test_first_failing_check_wins() {
    let ctx = TestContext::new();
    let now = queries::now();

    // Expired, exhausted and for the wrong plan: expiry is checked first.
    let mut input = promo_input("OLDCODE", DiscountType::FixedAmount, 1000);
    input.valid_from = now - 60 * DAY;
    input.valid_until = now - DAY;
    input.max_uses = Some(1);
    input.applicable_plans = Some(vec![PlanType::Yearly]);
    let promo = create_promo(&ctx, input);
    ctx.conn()
        .execute("UPDATE promo_codes SET current_uses = 1 WHERE id = ?1", [&promo.id])
        .unwrap();

    let reason = rejection(eligibility(&ctx, "OLDCODE", PlanType::Monthly, "user-1"));
    assert_eq!(reason, PromoRejection::Expired);
}

#[test]
fn test_exhausted_before_plan_mismatch() {
    let ctx = TestContext::new();
    let mut input = promo_input("LIMITED", DiscountType::Percentage, 10);
    input.max_uses = Some(1);
    input.applicable_plans = Some(vec![PlanType::Yearly]);
    let promo = create_promo(&ctx, input);
    record_use(&mut ctx.conn(), &promo.id, "someone-else", None).unwrap().unwrap();

    let reason = rejection(eligibility(&ctx, "LIMITED", PlanType::Monthly, "user-1"));
    assert_eq!(reason, PromoRejection::ExhaustedUses);
}

#[test]
fn test_plan_mismatch() {
    let ctx = TestContext::new();
    let mut input = promo_input("YEARONLY", DiscountType::Percentage, 10);
    input.applicable_plans = Some(vec![PlanType::Yearly]);
    create_promo(&ctx, input);

    let reason = rejection(eligibility(&ctx, "YEARONLY", PlanType::Monthly, "user-1"));
    assert_eq!(reason, PromoRejection::PlanMismatch);
    assert!(matches!(
        eligibility(&ctx, "YEARONLY", PlanType::Yearly, "user-1"),
        EligibilityResult::Eligible(_)
    ));
}

#[test]
fn test_new_users_only_counts_cancelled_subscriptions() {
    let ctx = TestContext::new();
    let mut input = promo_input("WELCOME", DiscountType::FreeTrial, 14);
    input.new_users_only = true;
    create_promo(&ctx, input);

    let admin = ctx.admin();
    admin.grant("admin-1", "returning", PlanType::Monthly, None).unwrap();
    admin.revoke("admin-1", "returning").unwrap();

    let reason = rejection(eligibility(&ctx, "WELCOME", PlanType::Monthly, "returning"));
    assert_eq!(reason, PromoRejection::NotNewUser);
    assert!(matches!(
        eligibility(&ctx, "WELCOME", PlanType::Monthly, "brand-new"),
        EligibilityResult::Eligible(_)
    ));
}

#[test]
fn test_second_redemption_by_same_user_is_already_used() {
    let ctx = TestContext::new();
    let promo = create_promo(&ctx, promo_input("ONCE", DiscountType::Percentage, 20));

    let first = record_use(&mut ctx.conn(), &promo.id, "user-1", None).unwrap();
    assert!(first.is_ok());

    let second = record_use(&mut ctx.conn(), &promo.id, "user-1", None).unwrap();
    assert_eq!(second.unwrap_err(), PromoRejection::AlreadyUsed);

    // The rejected attempt did not consume a use.
    let promo = queries::get_promo_code_by_id(&ctx.conn(), &promo.id).unwrap().unwrap();
    assert_eq!(promo.current_uses, 1);

    let reason = rejection(eligibility(&ctx, "ONCE", PlanType::Monthly, "user-1"));
    assert_eq!(reason, PromoRejection::AlreadyUsed);
}

#[test]
fn test_redeeming_unknown_promo_id() {
    let ctx = TestContext::new();
    let result = record_use(&mut ctx.conn(), "missing", "user-1", None).unwrap();
    assert_eq!(result.unwrap_err(), PromoRejection::NotFound);
}

#[test]
fn test_concurrent_redemptions_never_exceed_max_uses() {
    const MAX_USES: i64 = 3;
    const RACERS: usize = 12;

    let ctx = TestContext::new();
    let mut input = promo_input("LASTCALL", DiscountType::FixedAmount, 5000);
    input.max_uses = Some(MAX_USES);
    let promo = create_promo(&ctx, input);

    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let pool = ctx.pool.clone();
            let barrier = barrier.clone();
            let promo_id = promo.id.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut conn = pool.get().unwrap();
                record_use(&mut conn, &promo_id, &format!("racer-{}", i), None).unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let recorded = results.iter().filter(|r| r.is_ok()).count();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(PromoRejection::ExhaustedUses)))
        .count();

    assert_eq!(recorded as i64, MAX_USES);
    assert_eq!(exhausted, RACERS - MAX_USES as usize);

    let promo = queries::get_promo_code_by_id(&ctx.conn(), &promo.id).unwrap().unwrap();
    assert_eq!(promo.current_uses, MAX_USES);
    assert_eq!(queries::list_promo_code_uses(&ctx.conn(), &promo.id).unwrap().len() as i64, MAX_USES);
}

#[test]
fn test_same_user_racing_redeems_once() {
    const RACERS: usize = 8;

    let ctx = TestContext::new();
    let promo = create_promo(&ctx, promo_input("DOUBLETAP", DiscountType::Percentage, 50));

    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let pool = ctx.pool.clone();
            let barrier = barrier.clone();
            let promo_id = promo.id.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut conn = pool.get().unwrap();
                record_use(&mut conn, &promo_id, "same-user", None).unwrap()
            })
        })
        .collect();

    let recorded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();

    assert_eq!(recorded, 1);
    let promo = queries::get_promo_code_by_id(&ctx.conn(), &promo.id).unwrap().unwrap();
    assert_eq!(promo.current_uses, 1);
}

#[test]
fn test_duplicate_code_is_rejected() {
    let ctx = TestContext::new();
    create_promo(&ctx, promo_input("DUPE", DiscountType::Percentage, 5));

    let input = promo_input("dupe", DiscountType::Percentage, 10);
    let result = queries::create_promo_code(&ctx.conn(), "DUPE", &input);
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[test]
fn test_recheck_for_order_sees_uses_made_after_checkout() {
    let ctx = TestContext::new();
    let mut input = promo_input("ONCE", DiscountType::FreeTrial, 14);
    input.max_uses = Some(1);
    let promo = create_promo(&ctx, input);
    let now = queries::now();

    let recheck = |user: &str| {
        recheck_for_order(&ctx.conn(), &promo.id, PlanType::Monthly, user, now).unwrap()
    };
    assert_eq!(recheck("user-1"), None);

    record_use(&mut ctx.conn(), &promo.id, "user-1", None).unwrap().unwrap();

    // Remaining uses is checked before prior use.
    assert_eq!(recheck("user-1"), Some(PromoRejection::ExhaustedUses));
    assert_eq!(recheck("user-2"), Some(PromoRejection::ExhaustedUses));
}

#[test]
fn test_recheck_for_order_reports_prior_use_and_missing_code() {
    let ctx = TestContext::new();
    let promo = create_promo(&ctx, promo_input("REPEAT10", DiscountType::Percentage, 10));
    let now = queries::now();
    record_use(&mut ctx.conn(), &promo.id, "user-1", None).unwrap().unwrap();

    let reason = recheck_for_order(&ctx.conn(), &promo.id, PlanType::Monthly, "user-1", now).unwrap();
    assert_eq!(reason, Some(PromoRejection::AlreadyUsed));

    let reason = recheck_for_order(&ctx.conn(), "missing", PlanType::Monthly, "user-1", now).unwrap();
    assert_eq!(reason, Some(PromoRejection::NotFound));
}
