use axum::extract::{Extension, State};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::CurrentUser;
use crate::models::{PaymentTransaction, TransactionStatus};

/// Mark a completed transaction refunded. Moving the money back is done in
/// the gateway console; this only keeps the ledger in step.
pub async fn refund_transaction(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<PaymentTransaction>> {
    let conn = state.db.get()?;
    let transaction = queries::get_transaction_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Transaction not found".into()))?;

    if !queries::mark_transaction_refunded(&conn, &id)? {
        return Err(AppError::BadRequest(format!(
            "Only completed transactions can be refunded (status is {})",
            transaction.status
        )));
    }

    tracing::info!(admin_id = %admin.user_id(), transaction_id = %id, "Transaction marked refunded");

    Ok(Json(PaymentTransaction {
        status: TransactionStatus::Refunded,
        ..transaction
    }))
}
