//! Mobile-money payment endpoints: initiation, provider callback and
//! manual status checks.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use secrecy::ExposeSecret;
use serde_json::Value;
use service_core::error::AppError;
use subtle::ConstantTimeEq;
use validator::Validate;

use crate::{
    dtos::{CallbackQuery, InitiatePaymentRequest, InitiatePaymentResponse, ReconciliationResponse},
    middleware::Actor,
    services::PaymentError,
    AppState,
};

pub async fn initiate_payment(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        lease_id = %payload.lease_id,
        user_id = %actor.user_id,
        amount = %payload.amount,
        currency = %payload.currency,
        transaction_type = payload.transaction_type.as_str(),
        "Initiating mobile-money payment"
    );

    let response = state
        .initiation
        .initiate(actor.user_id, payload.into())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiatePaymentResponse {
            transaction: response.transaction.into(),
            provider_payload: response.provider_payload,
        }),
    ))
}

/// Provider webhook. The body is kept as raw JSON so the full payload is
/// stored alongside the transaction.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    Json(payload): Json<Value>,
) -> Result<Json<ReconciliationResponse>, AppError> {
    if let Some(expected) = &state.config.gateway.callback_token {
        let supplied = query.token.unwrap_or_default();
        let matches: bool = supplied
            .as_bytes()
            .ct_eq(expected.expose_secret().as_bytes())
            .into();
        if !matches {
            tracing::warn!("Gateway callback rejected: bad token");
            return Err(PaymentError::InvalidCallbackToken.into());
        }
    }

    let result = state.engine.handle_callback(payload).await?;

    tracing::info!(
        transaction_id = %result.transaction.id,
        status = %result.transaction.status,
        ledger_updated = result.ledger_updated,
        duplicate = result.duplicate,
        "Gateway callback applied"
    );

    Ok(Json(result.into()))
}

/// Ask the gateway for the order's status and reconcile it now.
pub async fn check_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_number): Path<String>,
) -> Result<Json<ReconciliationResponse>, AppError> {
    let transaction = state
        .store
        .find_transaction_by_gateway_key(&order_number)
        .await
        .map_err(PaymentError::from)?
        .ok_or_else(|| PaymentError::TransactionNotFound(order_number.clone()))?;

    if transaction.tenant_id != actor.user_id && transaction.landlord_id != actor.user_id {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Not a party to this transaction"
        )));
    }

    tracing::info!(
        transaction_id = %transaction.id,
        order_number = %order_number,
        user_id = %actor.user_id,
        "Manual transaction check"
    );

    let result = state.engine.verify_by_order_number(&order_number).await?;
    Ok(Json(result.into()))
}
