mod checkout;
mod confirm;
mod promo;

pub use checkout::*;
pub use confirm::*;
pub use promo::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::extractors::Json;
use crate::middleware::require_user;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/promo-codes/validate", get(validate_promo_code))
        .route("/payments/confirm", post(confirm_payment))
        .layer(middleware::from_fn_with_state(state, require_user))
        .route("/health", get(health))
}
