mod followups;
mod premium;
mod promo_codes;
mod settlement;
mod transactions;

pub use followups::*;
pub use premium::*;
pub use promo_codes::*;
pub use settlement::*;
pub use transactions::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::require_admin;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/premium/grant", post(grant_premium))
        .route("/admin/premium/revoke", post(revoke_premium))
        .route("/admin/settlement", get(get_settlement))
        .route("/admin/promo-codes", post(create_promo_code).get(list_promo_codes))
        .route("/admin/transactions/{id}/refund", post(refund_transaction))
        .route("/admin/followups", get(list_followups))
        .route("/admin/followups/{id}/resolve", post(resolve_followup))
        .layer(middleware::from_fn_with_state(state, require_admin))
}
