use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::ValidationError;

const SECONDS_PER_DAY: i64 = 86400;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlanType {
    Monthly,
    Yearly,
}

impl PlanType {
    /// Parse caller input; anything but `monthly` / `yearly` is a validation error.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        raw.trim()
            .to_lowercase()
            .parse()
            .map_err(|_| ValidationError::InvalidPlan(raw.to_string()))
    }

    /// Length of one billing period when no explicit duration is given.
    pub fn default_duration_days(&self) -> i64 {
        match self {
            PlanType::Monthly => 30,
            PlanType::Yearly => 365,
        }
    }

    /// Number of months a single payment for this plan covers.
    pub fn months(&self) -> i64 {
        match self {
            PlanType::Monthly => 1,
            PlanType::Yearly => 12,
        }
    }

    /// Display name sent to the gateway as the order name.
    pub fn order_name(&self) -> &'static str {
        match self {
            PlanType::Monthly => "Premium (monthly)",
            PlanType::Yearly => "Premium (yearly)",
        }
    }
}

/// Period end for a subscription starting at `started_at`.
///
/// `duration_days` overrides the plan default (admin grants only).
pub fn period_end(started_at: i64, plan_type: PlanType, duration_days: Option<i64>) -> i64 {
    let days = duration_days.unwrap_or_else(|| plan_type.default_duration_days());
    started_at + days * SECONDS_PER_DAY
}

/// Base prices per plan, in minor currency units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanPrices {
    pub monthly: i64,
    pub yearly: i64,
}

impl PlanPrices {
    pub fn price_for(&self, plan_type: PlanType) -> i64 {
        match plan_type {
            PlanType::Monthly => self.monthly,
            PlanType::Yearly => self.yearly,
        }
    }
}

impl Default for PlanPrices {
    fn default() -> Self {
        Self {
            monthly: 9900,
            yearly: 99000,
        }
    }
}
