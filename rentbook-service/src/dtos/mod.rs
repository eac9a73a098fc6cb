use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{
    Currency, EntryStatus, Lease, LeaseStatus, PaymentEntry, PaymentMethodStatus,
    PaymentMethodType, Transaction, TransactionStatus, TransactionType,
};
use crate::services::{ApplyResult, InitiateRequest, ManualPaymentRequest};

fn positive(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub lease_id: Uuid,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    #[validate(length(min = 6, max = 32))]
    pub phone: String,
    pub currency: Currency,
    #[serde(default, rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub utility_bill_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl From<InitiatePaymentRequest> for InitiateRequest {
    fn from(request: InitiatePaymentRequest) -> Self {
        Self {
            lease_id: request.lease_id,
            amount: request.amount,
            phone: request.phone,
            currency: request.currency,
            transaction_type: request.transaction_type,
            utility_bill_id: request.utility_bill_id,
            description: request.description,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManualPaymentBody {
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    pub method: PaymentMethodType,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub reference: Option<String>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub comment: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl From<ManualPaymentBody> for ManualPaymentRequest {
    fn from(body: ManualPaymentBody) -> Self {
        Self {
            amount: body.amount,
            method: body.method,
            reference: body.reference,
            comment: body.comment,
            date: body.date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub token: Option<String>,
}

/// Transaction view returned to clients. The raw provider response stays
/// server-side.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub lease_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub payment_status: PaymentMethodStatus,
    pub receipt_number: String,
    pub reference: Option<String>,
    pub order_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            lease_id: tx.lease_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount.value,
            currency: tx.amount.currency,
            status: tx.status,
            payment_status: tx.payment_method.status,
            receipt_number: tx.metadata.receipt_number,
            reference: tx.payment_method.reference,
            order_number: tx.payment_method.order_number,
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub transaction: TransactionResponse,
    pub provider_payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    pub transaction: TransactionResponse,
    pub ledger_updated: bool,
    pub duplicate: bool,
}

impl From<ApplyResult> for ReconciliationResponse {
    fn from(result: ApplyResult) -> Self {
        Self {
            transaction: result.transaction.into(),
            ledger_updated: result.ledger_updated,
            duplicate: result.duplicate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentEntryResponse {
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub method: PaymentMethodType,
    pub status: EntryStatus,
    pub reference: String,
    pub comment: Option<String>,
}

impl From<PaymentEntry> for PaymentEntryResponse {
    fn from(entry: PaymentEntry) -> Self {
        Self {
            date: entry.date,
            amount: entry.amount,
            method: entry.method,
            status: entry.status,
            reference: entry.reference,
            comment: entry.comment,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeasePaymentsResponse {
    pub lease_id: Uuid,
    pub status: LeaseStatus,
    pub monthly_rent: Decimal,
    pub currency: Currency,
    pub payment_history: Vec<PaymentEntryResponse>,
}

impl From<Lease> for LeasePaymentsResponse {
    fn from(lease: Lease) -> Self {
        Self {
            lease_id: lease.id,
            status: lease.status,
            monthly_rent: lease.monthly_rent,
            currency: lease.currency,
            payment_history: lease
                .payment_history
                .into_iter()
                .map(PaymentEntryResponse::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initiate_request_defaults_to_rent_and_validates_amount() {
        let request: InitiatePaymentRequest = serde_json::from_value(json!({
            "lease_id": Uuid::new_v4(),
            "amount": "0",
            "phone": "0990000001",
            "currency": "USD"
        }))
        .unwrap();
        assert_eq!(request.transaction_type, TransactionType::Rent);
        assert!(request.validate().is_err());
    }

    #[test]
    fn manual_body_accepts_numeric_amounts() {
        let body: ManualPaymentBody = serde_json::from_value(json!({
            "amount": 250,
            "method": "cash",
            "reference": "CASH-7"
        }))
        .unwrap();
        assert!(body.validate().is_ok());
        assert_eq!(body.amount, Decimal::from(250));
    }
}
