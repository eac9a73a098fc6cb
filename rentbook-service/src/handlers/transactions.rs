use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{dtos::TransactionResponse, middleware::Actor, services::PaymentError, AppState};

/// Get a transaction by ID. Only the tenant and landlord may read it.
pub async fn get_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    tracing::info!(
        transaction_id = %transaction_id,
        user_id = %actor.user_id,
        "Fetching transaction"
    );

    let transaction = state
        .store
        .get_transaction(transaction_id)
        .await
        .map_err(PaymentError::from)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    // Outsiders get the same answer as for a missing id.
    if transaction.tenant_id != actor.user_id && transaction.landlord_id != actor.user_id {
        return Err(AppError::NotFound(anyhow::anyhow!("Transaction not found")));
    }

    Ok(Json(TransactionResponse::from(transaction)))
}
