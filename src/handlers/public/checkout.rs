use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::billing::CheckoutSession;
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::PlanType;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub plan_type: String,
    #[serde(default)]
    pub promo_code: Option<String>,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutSession>> {
    let plan_type = PlanType::parse(&body.plan_type)?;
    let promo_code = body.promo_code.as_deref().filter(|c| !c.trim().is_empty());

    let session = state
        .checkout_builder()
        .create_checkout(&state.db, user.user_id(), plan_type, promo_code)
        .await?;

    Ok(Json(session))
}
