use axum::extract::{Extension, State};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{CreatePromoCode, PromoCodeWithStatus};
use crate::util::normalize_promo_code;

pub async fn create_promo_code(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Json(input): Json<CreatePromoCode>,
) -> Result<Json<PromoCodeWithStatus>> {
    let code = normalize_promo_code(&input.code)?;
    input.validate()?;

    let conn = state.db.get()?;
    let promo_code = queries::create_promo_code(&conn, &code, &input)?;

    tracing::info!(
        admin_id = %admin.user_id(),
        promo_code_id = %promo_code.id,
        code = %promo_code.code,
        "Promo code created"
    );

    let status = promo_code.status(queries::now());
    Ok(Json(PromoCodeWithStatus { promo_code, status }))
}

pub async fn list_promo_codes(State(state): State<AppState>) -> Result<Json<Vec<PromoCodeWithStatus>>> {
    let conn = state.db.get()?;
    let now = queries::now();
    let codes = queries::list_promo_codes(&conn)?
        .into_iter()
        .map(|promo_code| PromoCodeWithStatus {
            status: promo_code.status(now),
            promo_code,
        })
        .collect();
    Ok(Json(codes))
}
