use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::error::PaymentError;
use super::ledger::derive_entry_status;
use super::metrics;
use super::store::LedgerStore;
use crate::models::{EntrySource, Lease, PaymentEntry, PaymentMethodType};
use crate::utils::{is_receipt_reference, manual_reference};

#[derive(Debug, Clone)]
pub struct ManualPaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethodType,
    pub reference: Option<String>,
    pub comment: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Payments recorded straight into a lease's history, without a backing
/// transaction. The reference is the only deduplication key, so manual
/// entries never take a reference from the transaction receipt namespace.
#[derive(Clone)]
pub struct ManualPaymentService {
    store: Arc<dyn LedgerStore>,
    public_enabled: bool,
    receipt_max_attempts: u32,
}

impl ManualPaymentService {
    pub fn new(store: Arc<dyn LedgerStore>, public_enabled: bool, receipt_max_attempts: u32) -> Self {
        Self {
            store,
            public_enabled,
            receipt_max_attempts: receipt_max_attempts.max(1),
        }
    }

    pub fn public_enabled(&self) -> bool {
        self.public_enabled
    }

    pub async fn record_manual_payment(
        &self,
        actor: Uuid,
        lease_id: Uuid,
        request: ManualPaymentRequest,
    ) -> Result<PaymentEntry, PaymentError> {
        let lease = self.load_lease(lease_id).await?;
        if !lease.is_party(actor) {
            return Err(PaymentError::NotLeaseParty(lease.id));
        }
        self.record(&lease, request, Some(actor)).await
    }

    pub async fn record_public_payment(
        &self,
        lease_id: Uuid,
        request: ManualPaymentRequest,
    ) -> Result<PaymentEntry, PaymentError> {
        if !self.public_enabled {
            return Err(PaymentError::PublicPaymentsDisabled);
        }
        let lease = self.load_lease(lease_id).await?;
        self.record(&lease, request, None).await
    }

    async fn load_lease(&self, lease_id: Uuid) -> Result<Lease, PaymentError> {
        self.store
            .get_lease(lease_id)
            .await?
            .ok_or(PaymentError::LeaseNotFound(lease_id))
    }

    async fn check_reference_free(&self, reference: &str) -> Result<(), PaymentError> {
        if is_receipt_reference(reference)
            || self
                .store
                .find_transaction_by_receipt(reference)
                .await?
                .is_some()
        {
            return Err(PaymentError::ReservedReference(reference.to_string()));
        }
        Ok(())
    }

    async fn record(
        &self,
        lease: &Lease,
        request: ManualPaymentRequest,
        actor: Option<Uuid>,
    ) -> Result<PaymentEntry, PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }
        if !lease.is_active() {
            return Err(PaymentError::LeaseInactive {
                lease_id: lease.id,
                status: lease.status,
            });
        }

        let supplied = request
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        if let Some(reference) = &supplied {
            self.check_reference_free(reference).await?;
        }
        let date = request.date.unwrap_or_else(Utc::now);
        let attempts = if supplied.is_some() { 1 } else { self.receipt_max_attempts };

        for _ in 0..attempts {
            let reference = supplied.clone().unwrap_or_else(|| manual_reference(date));
            let entry = PaymentEntry {
                date,
                amount: request.amount,
                method: request.method,
                status: derive_entry_status(request.amount, lease.monthly_rent),
                reference,
                comment: request.comment.clone(),
                source: EntrySource::Manual,
                transaction_id: None,
            };

            if self.store.append_payment_entry(lease.id, &entry).await? {
                metrics::record_ledger_entry(EntrySource::Manual.as_str());
                tracing::info!(
                    lease_id = %lease.id,
                    reference = %entry.reference,
                    amount = %entry.amount,
                    actor = ?actor,
                    "Manual payment recorded"
                );
                return Ok(entry);
            }

            if let Some(reference) = &supplied {
                return Err(PaymentError::DuplicateReference(reference.clone()));
            }
        }

        Err(PaymentError::ReceiptCollision(attempts))
    }
}
