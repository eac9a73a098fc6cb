use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use super::gateway::GatewayError;
use super::store::StoreError;
use crate::models::LeaseStatus;
use crate::utils::PhoneError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Lease not found: {0}")]
    LeaseNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Utility bill not found: {0}")]
    UtilityBillNotFound(Uuid),

    #[error("Lease {lease_id} is {status}")]
    LeaseInactive { lease_id: Uuid, status: LeaseStatus },

    #[error("Not a party to lease {0}")]
    NotLeaseParty(Uuid),

    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),

    #[error("Payment reference {0} already recorded for this lease")]
    DuplicateReference(String),

    #[error("Payment reference {0} is reserved for gateway receipts")]
    ReservedReference(String),

    #[error("Payment history of lease {0} kept changing during repair")]
    HistoryChanged(Uuid),

    #[error("Payment gateway rejected the payment: {0}")]
    GatewayRejected(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway is not configured")]
    GatewayNotConfigured,

    #[error("Could not allocate a unique receipt number after {0} attempts")]
    ReceiptCollision(u32),

    #[error("Public payment recording is disabled")]
    PublicPaymentsDisabled,

    #[error("Invalid callback token")]
    InvalidCallbackToken,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured => PaymentError::GatewayNotConfigured,
            GatewayError::Unavailable(e) => PaymentError::GatewayUnavailable(e),
            GatewayError::InvalidResponse(e) => PaymentError::GatewayUnavailable(e),
            GatewayError::Rejected { message, .. } => PaymentError::GatewayRejected(message),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let message = err.to_string();
        match err {
            PaymentError::LeaseNotFound(_)
            | PaymentError::TransactionNotFound(_)
            | PaymentError::UtilityBillNotFound(_)
            | PaymentError::PublicPaymentsDisabled => AppError::NotFound(anyhow::anyhow!(message)),
            PaymentError::LeaseInactive { .. }
            | PaymentError::DuplicateReference(_)
            | PaymentError::ReservedReference(_)
            | PaymentError::HistoryChanged(_) => AppError::Conflict(anyhow::anyhow!(message)),
            PaymentError::NotLeaseParty(_) => AppError::Forbidden(anyhow::anyhow!(message)),
            PaymentError::InvalidCallbackToken => AppError::Unauthorized(anyhow::anyhow!(message)),
            PaymentError::InvalidRequest(_) | PaymentError::InvalidPhone(_) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            PaymentError::GatewayRejected(_) | PaymentError::GatewayUnavailable(_) => {
                AppError::BadGateway(message)
            }
            PaymentError::GatewayNotConfigured => AppError::ServiceUnavailable,
            PaymentError::ReceiptCollision(_) => AppError::InternalError(anyhow::anyhow!(message)),
            PaymentError::Store(StoreError::Database(e)) => AppError::DatabaseError(e.into()),
            PaymentError::Store(e) => AppError::InternalError(e.into()),
        }
    }
}
