use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{PlanType, Subscription, UserAccount};

#[derive(Debug, Deserialize)]
pub struct GrantBody {
    pub user_id: String,
    pub plan_type: String,
    #[serde(default)]
    pub duration_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub subscription_id: String,
    pub subscription: Subscription,
    pub account: Option<UserAccount>,
}

pub async fn grant_premium(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Json(body): Json<GrantBody>,
) -> Result<Json<GrantResponse>> {
    let plan_type = PlanType::parse(&body.plan_type)?;
    let grant = state
        .admin()
        .grant(admin.user_id(), &body.user_id, plan_type, body.duration_days)?;

    Ok(Json(GrantResponse {
        subscription_id: grant.subscription.id.clone(),
        subscription: grant.subscription,
        account: grant.account,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeBody {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub ok: bool,
    pub cancelled_subscription_id: Option<String>,
    pub account: Option<UserAccount>,
}

pub async fn revoke_premium(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Json(body): Json<RevokeBody>,
) -> Result<Json<RevokeResponse>> {
    let revocation = state.admin().revoke(admin.user_id(), &body.user_id)?;

    Ok(Json(RevokeResponse {
        ok: true,
        cancelled_subscription_id: revocation.cancelled.map(|s| s.id),
        account: revocation.account,
    }))
}
