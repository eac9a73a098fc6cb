//! Ledger Store: leases with their embedded payment history, transactions,
//! utility bills and apartment payment bookkeeping.
//!
//! Every mutation that the reconciliation path relies on is a single
//! conditional write, so concurrent callbacks and polls for the same
//! transaction serialize on the store rather than on process-local locks.

mod memory;
mod mongo;

pub use memory::InMemoryLedgerStore;
pub use mongo::MongoLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ApartmentPaymentStatus, BillStatus, Lease, PaymentEntry, PaymentMethodStatus, Transaction,
    TransactionStatus, UtilityBill,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Terminal state written by [`LedgerStore::transition_if_pending`].
#[derive(Debug, Clone)]
pub struct Settlement {
    pub status: TransactionStatus,
    pub method_status: PaymentMethodStatus,
    pub provider_response: Value,
    pub at: DateTime<Utc>,
}

impl Settlement {
    pub fn complete(provider_response: Value, at: DateTime<Utc>) -> Self {
        Self {
            status: TransactionStatus::Complete,
            method_status: PaymentMethodStatus::Completed,
            provider_response,
            at,
        }
    }

    pub fn failed(provider_response: Value, at: DateTime<Utc>) -> Self {
        Self {
            status: TransactionStatus::Failed,
            method_status: PaymentMethodStatus::Failed,
            provider_response,
            at,
        }
    }
}

/// Gateway details recorded on a still-pending transaction. `None` fields
/// are left untouched.
#[derive(Debug, Clone, Default)]
pub struct GatewayUpdate {
    pub reference: Option<String>,
    pub order_number: Option<String>,
    pub provider_response: Option<Value>,
    pub provider_error: Option<String>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // Leases

    async fn insert_lease(&self, lease: &Lease) -> StoreResult<()>;

    async fn get_lease(&self, id: Uuid) -> StoreResult<Option<Lease>>;

    async fn list_lease_ids(&self) -> StoreResult<Vec<Uuid>>;

    /// Append `entry` unless the lease already holds an entry with the same
    /// reference. Returns whether the entry was appended.
    async fn append_payment_entry(&self, lease_id: Uuid, entry: &PaymentEntry)
        -> StoreResult<bool>;

    /// Overwrite the payment history of `snapshot`'s lease, provided the
    /// lease is unchanged since `snapshot` was read. Returns false when a
    /// concurrent write got there first. Offline repair only.
    async fn replace_payment_history(
        &self,
        snapshot: &Lease,
        entries: &[PaymentEntry],
    ) -> StoreResult<bool>;

    // Transactions

    /// Fails with [`StoreError::DuplicateKey`] when the receipt number is taken.
    async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<()>;

    async fn get_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>>;

    async fn find_transaction_by_receipt(&self, receipt_number: &str)
        -> StoreResult<Option<Transaction>>;

    /// Exact match on the persisted gateway reference or order number.
    async fn find_transaction_by_gateway_key(&self, key: &str)
        -> StoreResult<Option<Transaction>>;

    async fn list_transactions_for_lease(
        &self,
        lease_id: Uuid,
        status: Option<TransactionStatus>,
    ) -> StoreResult<Vec<Transaction>>;

    /// Record gateway details. Identifiers are always stored so late
    /// acknowledgements stay findable; the provider response and error only
    /// while the transaction is pending. Returns whether the transaction
    /// exists.
    async fn record_gateway_response(&self, id: Uuid, update: &GatewayUpdate)
        -> StoreResult<bool>;

    /// Move a transaction out of `pending`. Returns the updated transaction,
    /// or `None` when it was not pending (or does not exist).
    async fn transition_if_pending(
        &self,
        id: Uuid,
        settlement: &Settlement,
    ) -> StoreResult<Option<Transaction>>;

    // Utility bills

    async fn insert_utility_bill(&self, bill: &UtilityBill) -> StoreResult<()>;

    async fn get_utility_bill(&self, id: Uuid) -> StoreResult<Option<UtilityBill>>;

    /// Mark the apartment's unpaid share as paid. Returns whether a share
    /// changed.
    async fn settle_bill_share(
        &self,
        bill_id: Uuid,
        apartment_id: Uuid,
        transaction_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Advance the bill status from its shares. Never moves backwards.
    async fn mark_bill_paid_if_settled(&self, bill_id: Uuid) -> StoreResult<Option<BillStatus>>;

    // Apartments

    async fn insert_apartment(&self, apartment: &ApartmentPaymentStatus) -> StoreResult<()>;

    async fn get_apartment(&self, id: Uuid) -> StoreResult<Option<ApartmentPaymentStatus>>;

    /// Returns false when the apartment record is unknown.
    async fn record_rent_payment(
        &self,
        apartment_id: Uuid,
        paid_at: DateTime<Utc>,
        next_due: NaiveDate,
    ) -> StoreResult<bool>;
}
