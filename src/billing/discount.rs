//! Pure price arithmetic. No I/O.

use serde::Serialize;
use thiserror::Error;

use crate::models::DiscountType;

/// Programming errors: a caller handed us data that storage constraints
/// should already have ruled out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscountError {
    #[error("Base price must not be negative (got {0})")]
    NegativeBasePrice(i64),

    #[error("Invalid discount value {value} for {discount_type}")]
    InvalidDiscountValue {
        discount_type: DiscountType,
        value: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscountOutcome {
    pub base_price: i64,
    pub discount_amount: i64,
    pub final_price: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_trial_days: Option<i64>,
}

/// Apply a promo rule to a base price in minor units.
///
/// - percentage: `base - floor(base * value / 100)`
/// - fixed amount: `max(0, base - value)`
/// - free trial: `0`, with `value` trial days
pub fn apply_discount(
    base_price: i64,
    discount_type: DiscountType,
    discount_value: i64,
) -> Result<DiscountOutcome, DiscountError> {
    if base_price < 0 {
        return Err(DiscountError::NegativeBasePrice(base_price));
    }

    let invalid = || DiscountError::InvalidDiscountValue {
        discount_type,
        value: discount_value,
    };

    let (final_price, free_trial_days) = match discount_type {
        DiscountType::Percentage => {
            if !(0..=100).contains(&discount_value) {
                return Err(invalid());
            }
            // i128 keeps base * value exact for any i64 base.
            let off = (base_price as i128 * discount_value as i128) / 100;
            (base_price - off as i64, None)
        }
        DiscountType::FixedAmount => {
            if discount_value < 0 {
                return Err(invalid());
            }
            ((base_price - discount_value).max(0), None)
        }
        DiscountType::FreeTrial => {
            if discount_value <= 0 {
                return Err(invalid());
            }
            (0, Some(discount_value))
        }
    };

    Ok(DiscountOutcome {
        base_price,
        discount_amount: base_price - final_price,
        final_price,
        free_trial_days,
    })
}
