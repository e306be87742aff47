use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Why a promo code cannot be applied for a given user and plan.
///
/// Variants are listed in the order the ledger evaluates them; the first
/// failing check is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromoRejection {
    NotFound,
    Expired,
    ExhaustedUses,
    PlanMismatch,
    NotNewUser,
    AlreadyUsed,
}

impl PromoRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Expired => "EXPIRED",
            Self::ExhaustedUses => "EXHAUSTED_USES",
            Self::PlanMismatch => "PLAN_MISMATCH",
            Self::NotNewUser => "NOT_NEW_USER",
            Self::AlreadyUsed => "ALREADY_USED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "Promo code not found",
            Self::Expired => "Promo code is not valid at this time",
            Self::ExhaustedUses => "Promo code has no remaining uses",
            Self::PlanMismatch => "Promo code does not apply to this plan",
            Self::NotNewUser => "Promo code is only available to new subscribers",
            Self::AlreadyUsed => "Promo code has already been used by this account",
        }
    }
}

impl std::fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Input problems the caller can fix by correcting the request.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid plan type: {0}")]
    InvalidPlan(String),

    #[error("Malformed promo code")]
    MalformedPromoCode,

    #[error("{0}")]
    Ineligible(PromoRejection),

    #[error("{0}")]
    Invalid(String),
}

/// Failures reported by (or while talking to) the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment declined ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("Billing key issuance failed: {0}")]
    BillingKeyIssuance(String),

    #[error("Payment gateway unreachable: {0}")]
    Transport(String),

    #[error("Unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Money may have moved but no subscription exists. Never retried silently.
    #[error("Subscription creation failed for order {order_id}")]
    SubscriptionCreationFailed { order_id: String },

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Validation(ValidationError::Ineligible(reason)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, reason.code())
            }
            AppError::Validation(ValidationError::InvalidPlan(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_PLAN")
            }
            AppError::Validation(ValidationError::MalformedPromoCode) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_PROMO_CODE")
            }
            AppError::Validation(ValidationError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Gateway(GatewayError::Declined { .. }) => {
                (StatusCode::PAYMENT_REQUIRED, "PAYMENT_DECLINED")
            }
            AppError::Gateway(GatewayError::BillingKeyIssuance(_)) => {
                (StatusCode::PAYMENT_REQUIRED, "GATEWAY_SETUP_FAILED")
            }
            AppError::Gateway(_) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            AppError::SubscriptionCreationFailed { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SUBSCRIPTION_CREATION_FAILED",
            ),
            AppError::ConsistencyViolation(_) => (StatusCode::CONFLICT, "CONSISTENCY_VIOLATION"),
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Storage details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            match &self {
                AppError::SubscriptionCreationFailed { .. } => {
                    "Payment was received but the subscription could not be activated. Support has been notified."
                        .to_string()
                }
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(ErrorBody { error: message, code })).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
