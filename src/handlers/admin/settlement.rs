use axum::extract::State;
use serde::Deserialize;

use crate::billing::{self, Settlement, SettlementChannel};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};

#[derive(Debug, Deserialize)]
pub struct SettlementQuery {
    /// Inclusive lower bound on `paid_at` (Unix seconds)
    #[serde(default)]
    pub from: Option<i64>,
    /// Exclusive upper bound on `paid_at` (Unix seconds)
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default)]
    pub channel: Option<SettlementChannel>,
}

pub async fn get_settlement(
    State(state): State<AppState>,
    Query(query): Query<SettlementQuery>,
) -> Result<Json<Settlement>> {
    let conn = state.db.get()?;
    let settlement = billing::get_settlement(&conn, query.from, query.to, query.channel)?;
    Ok(Json(settlement))
}
