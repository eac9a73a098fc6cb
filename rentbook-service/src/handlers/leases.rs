//! Lease payment history and manually recorded payments.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{LeasePaymentsResponse, ManualPaymentBody, PaymentEntryResponse},
    middleware::Actor,
    services::PaymentError,
    AppState,
};

pub async fn list_payments(
    State(state): State<AppState>,
    actor: Actor,
    Path(lease_id): Path<Uuid>,
) -> Result<Json<LeasePaymentsResponse>, AppError> {
    let lease = state
        .store
        .get_lease(lease_id)
        .await
        .map_err(PaymentError::from)?
        .ok_or(PaymentError::LeaseNotFound(lease_id))?;

    if !lease.is_party(actor.user_id) {
        return Err(PaymentError::NotLeaseParty(lease_id).into());
    }

    Ok(Json(LeasePaymentsResponse::from(lease)))
}

pub async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(lease_id): Path<Uuid>,
    Json(payload): Json<ManualPaymentBody>,
) -> Result<(StatusCode, Json<PaymentEntryResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        lease_id = %lease_id,
        user_id = %actor.user_id,
        amount = %payload.amount,
        "Recording manual payment"
    );

    let entry = state
        .manual
        .record_manual_payment(actor.user_id, lease_id, payload.into())
        .await?;

    Ok((StatusCode::CREATED, Json(entry.into())))
}

/// Unauthenticated variant, served only while public manual payments are
/// enabled.
pub async fn record_public_payment(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Json(payload): Json<ManualPaymentBody>,
) -> Result<(StatusCode, Json<PaymentEntryResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        lease_id = %lease_id,
        amount = %payload.amount,
        "Recording public payment"
    );

    let entry = state
        .manual
        .record_public_payment(lease_id, payload.into())
        .await?;

    Ok((StatusCode::CREATED, Json(entry.into())))
}
