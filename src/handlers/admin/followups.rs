use axum::extract::{Extension, State};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::CurrentUser;
use crate::models::SagaFollowup;

pub async fn list_followups(State(state): State<AppState>) -> Result<Json<Vec<SagaFollowup>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_open_followups(&conn)?))
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    /// False when the follow-up was already resolved.
    pub resolved: bool,
}

pub async fn resolve_followup(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ResolveResponse>> {
    let conn = state.db.get()?;
    if !queries::followup_exists(&conn, &id)? {
        return Err(AppError::NotFound("Follow-up not found".into()));
    }
    let resolved = queries::resolve_followup(&conn, &id, queries::now())?;
    if resolved {
        tracing::info!(admin_id = %admin.user_id(), followup_id = %id, "Follow-up resolved");
    }
    Ok(Json(ResolveResponse { resolved }))
}
