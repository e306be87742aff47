use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::PlanType;
use crate::error::ValidationError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
    FreeTrial,
}

/// Derived at read time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoCodeStatus {
    Scheduled,
    Active,
    Expired,
    UsedUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: String,
    /// Normalized (trimmed, NFKC, uppercase)
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    /// None = unlimited
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub valid_from: i64,
    pub valid_until: i64,
    /// None = all plans
    pub applicable_plans: Option<Vec<PlanType>>,
    pub new_users_only: bool,
    pub description: Option<String>,
    pub created_at: i64,
}

impl PromoCode {
    pub fn is_within_validity(&self, now: i64) -> bool {
        now >= self.valid_from && now <= self.valid_until
    }

    pub fn has_remaining_uses(&self) -> bool {
        self.max_uses.is_none_or(|max| self.current_uses < max)
    }

    pub fn applies_to(&self, plan_type: PlanType) -> bool {
        self.applicable_plans
            .as_ref()
            .is_none_or(|plans| plans.contains(&plan_type))
    }

    pub fn status(&self, now: i64) -> PromoCodeStatus {
        if now < self.valid_from {
            PromoCodeStatus::Scheduled
        } else if now > self.valid_until {
            PromoCodeStatus::Expired
        } else if !self.has_remaining_uses() {
            PromoCodeStatus::UsedUp
        } else {
            PromoCodeStatus::Active
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromoCodeWithStatus {
    #[serde(flatten)]
    pub promo_code: PromoCode,
    pub status: PromoCodeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCodeUse {
    pub id: String,
    pub promo_code_id: String,
    pub user_id: String,
    pub subscription_id: Option<String>,
    pub used_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(default)]
    pub max_uses: Option<i64>,
    pub valid_from: i64,
    pub valid_until: i64,
    #[serde(default)]
    pub applicable_plans: Option<Vec<PlanType>>,
    #[serde(default)]
    pub new_users_only: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreatePromoCode {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.discount_value < 0 {
            return Err(ValidationError::Invalid(
                "discount_value must not be negative".into(),
            ));
        }
        if self.discount_type == DiscountType::Percentage && self.discount_value > 100 {
            return Err(ValidationError::Invalid(
                "percentage discount must be between 0 and 100".into(),
            ));
        }
        if self.discount_type == DiscountType::FreeTrial && self.discount_value == 0 {
            return Err(ValidationError::Invalid(
                "free trial must grant at least one day".into(),
            ));
        }
        if self.valid_from >= self.valid_until {
            return Err(ValidationError::Invalid(
                "valid_from must be before valid_until".into(),
            ));
        }
        if matches!(self.max_uses, Some(max) if max < 1) {
            return Err(ValidationError::Invalid(
                "max_uses must be at least 1 when set".into(),
            ));
        }
        if matches!(&self.applicable_plans, Some(plans) if plans.is_empty()) {
            return Err(ValidationError::Invalid(
                "applicable_plans must be omitted or non-empty".into(),
            ));
        }
        Ok(())
    }
}
