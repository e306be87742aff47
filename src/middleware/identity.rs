use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::auth::Identity;
use crate::db::AppState;
use crate::error::AppError;
use crate::util::extract_bearer_token;

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl CurrentUser {
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let token = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    state.identity.verify(token)
}

pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(CurrentUser(identity));
    Ok(next.run(request).await)
}

/// Only callers the identity provider marks as administrators get through.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = authenticate(&state, request.headers())?;
    if !identity.is_admin {
        tracing::warn!(user_id = %identity.user_id, "Non-admin caller on admin route");
        return Err(AppError::Forbidden("Administrator role required".into()));
    }
    request.extensions_mut().insert(CurrentUser(identity));
    Ok(next.run(request).await)
}
