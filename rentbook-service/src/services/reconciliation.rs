//! Reconciliation engine: turns gateway results into ledger mutations.
//!
//! Callbacks, manual checks and deferred polls all land in [`ReconciliationEngine::settle`].
//! The transaction leaves `pending` through a single compare-and-set in the
//! store, and the payment entry append is guarded by its reference, so any
//! number of concurrent or repeated deliveries produce exactly one entry.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::error::PaymentError;
use super::gateway::{CallbackPayload, GatewayCode, GatewayOutcome, PaymentGateway};
use super::ledger::{entry_from_transaction, next_payment_due};
use super::messaging::ReceiptNotifier;
use super::metrics;
use super::scheduler::VerificationScheduler;
use super::store::{GatewayUpdate, LedgerStore, Settlement};
use crate::models::{
    EntrySource, Lease, Transaction, TransactionStatus, TransactionType,
};

/// Where a gateway result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Callback,
    Poll,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Callback => "callback",
            ResultSource::Poll => "poll",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub transaction: Transaction,
    pub ledger_updated: bool,
    /// The transaction was already settled when this result arrived.
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    scheduler: VerificationScheduler,
    notifier: ReceiptNotifier,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        scheduler: VerificationScheduler,
        notifier: ReceiptNotifier,
    ) -> Self {
        Self {
            store,
            gateway,
            scheduler,
            notifier,
        }
    }

    /// Apply a provider result code to the transaction holding
    /// `gateway_reference` as its reference or order number.
    pub async fn apply_gateway_result(
        &self,
        gateway_reference: &str,
        code: &GatewayCode,
        raw: Value,
        source: ResultSource,
    ) -> Result<ApplyResult, PaymentError> {
        let transaction = self
            .store
            .find_transaction_by_gateway_key(gateway_reference)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(gateway_reference.to_string()))?;

        tracing::info!(
            transaction_id = %transaction.id,
            gateway_reference = %gateway_reference,
            code = %code,
            source = source.as_str(),
            "Gateway result received"
        );
        self.settle(transaction, GatewayOutcome::from_code(code), raw, source)
            .await
    }

    /// Webhook entry point. The transaction is located by the echoed
    /// reference, then by order number.
    pub async fn handle_callback(&self, raw: Value) -> Result<ApplyResult, PaymentError> {
        let payload: CallbackPayload = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::InvalidRequest(format!("malformed callback: {}", e)))?;

        for key in [payload.reference.as_deref(), payload.order_number.as_deref()]
            .into_iter()
            .flatten()
        {
            match self
                .apply_gateway_result(key, &payload.code, raw.clone(), ResultSource::Callback)
                .await
            {
                Err(PaymentError::TransactionNotFound(_)) => continue,
                result => return result,
            }
        }

        tracing::warn!(
            reference = ?payload.reference,
            order_number = ?payload.order_number,
            "Callback for unknown transaction"
        );
        let key = payload
            .reference
            .or(payload.order_number)
            .unwrap_or_else(|| "<none>".to_string());
        Err(PaymentError::TransactionNotFound(key))
    }

    /// Poll entry point: ask the gateway for the order's status and apply it.
    pub async fn verify_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<ApplyResult, PaymentError> {
        let transaction = self
            .store
            .find_transaction_by_gateway_key(order_number)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(order_number.to_string()))?;

        if transaction.status.is_terminal() {
            return self
                .absorb_duplicate(transaction, ResultSource::Poll)
                .await;
        }

        let check = self.gateway.check(order_number).await?;
        if check.outcome == GatewayOutcome::Pending {
            tracing::info!(
                transaction_id = %transaction.id,
                order_number = %order_number,
                "Gateway still processing"
            );
            self.store
                .record_gateway_response(
                    transaction.id,
                    &GatewayUpdate {
                        provider_response: Some(check.raw),
                        ..GatewayUpdate::default()
                    },
                )
                .await?;
            let transaction = self
                .store
                .get_transaction(transaction.id)
                .await?
                .unwrap_or(transaction);
            return Ok(ApplyResult {
                transaction,
                ledger_updated: false,
                duplicate: false,
            });
        }

        self.settle(transaction, check.outcome, check.raw, ResultSource::Poll)
            .await
    }

    async fn settle(
        &self,
        transaction: Transaction,
        outcome: GatewayOutcome,
        raw: Value,
        source: ResultSource,
    ) -> Result<ApplyResult, PaymentError> {
        if transaction.status.is_terminal() {
            return self.absorb_duplicate(transaction, source).await;
        }

        let now = Utc::now();
        let settlement = match outcome {
            GatewayOutcome::Success => Settlement::complete(raw, now),
            GatewayOutcome::Failure => Settlement::failed(raw, now),
            GatewayOutcome::Pending => {
                return Ok(ApplyResult {
                    transaction,
                    ledger_updated: false,
                    duplicate: false,
                })
            }
        };

        let Some(updated) = self
            .store
            .transition_if_pending(transaction.id, &settlement)
            .await?
        else {
            // Lost the race to another delivery; treat it as a duplicate of
            // whatever won.
            let current = self
                .store
                .get_transaction(transaction.id)
                .await?
                .ok_or_else(|| PaymentError::TransactionNotFound(transaction.id.to_string()))?;
            return self.absorb_duplicate(current, source).await;
        };

        self.scheduler.cancel(updated.id);
        metrics::record_gateway_outcome(source.as_str(), outcome.as_str());

        if updated.status != TransactionStatus::Complete {
            tracing::info!(
                transaction_id = %updated.id,
                source = source.as_str(),
                "Transaction failed at gateway"
            );
            return Ok(ApplyResult {
                transaction: updated,
                ledger_updated: false,
                duplicate: false,
            });
        }

        let (ledger_updated, lease) = self.apply_to_ledger(&updated).await?;
        if let Some(lease) = &lease {
            self.notifier.send_receipt(lease, &updated);
        }

        tracing::info!(
            transaction_id = %updated.id,
            receipt_number = %updated.receipt_number(),
            source = source.as_str(),
            ledger_updated,
            "Transaction completed"
        );
        Ok(ApplyResult {
            transaction: updated,
            ledger_updated,
            duplicate: false,
        })
    }

    /// A result for an already settled transaction. Complete transactions
    /// get their ledger append retried, which heals an entry lost between
    /// the status change and the append.
    async fn absorb_duplicate(
        &self,
        transaction: Transaction,
        source: ResultSource,
    ) -> Result<ApplyResult, PaymentError> {
        metrics::record_duplicate_delivery(source.as_str());
        self.scheduler.cancel(transaction.id);

        let ledger_updated = if transaction.status == TransactionStatus::Complete {
            let (appended, _) = self.apply_to_ledger(&transaction).await?;
            if appended {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    receipt_number = %transaction.receipt_number(),
                    "Healed missing payment entry on duplicate delivery"
                );
            }
            appended
        } else {
            false
        };

        tracing::info!(
            transaction_id = %transaction.id,
            status = %transaction.status,
            source = source.as_str(),
            "Duplicate gateway delivery absorbed"
        );
        Ok(ApplyResult {
            transaction,
            ledger_updated,
            duplicate: true,
        })
    }

    /// Append the payment entry for a complete transaction and update the
    /// apartment and utility bill bookkeeping. Every step is idempotent.
    async fn apply_to_ledger(
        &self,
        transaction: &Transaction,
    ) -> Result<(bool, Option<Lease>), PaymentError> {
        let Some(lease_id) = transaction.lease_id else {
            tracing::warn!(transaction_id = %transaction.id, "Complete transaction has no lease");
            return Ok((false, None));
        };
        let Some(lease) = self.store.get_lease(lease_id).await? else {
            tracing::error!(
                transaction_id = %transaction.id,
                lease_id = %lease_id,
                "Lease missing for complete transaction"
            );
            return Ok((false, None));
        };
        if !lease.is_active() {
            tracing::warn!(
                transaction_id = %transaction.id,
                lease_id = %lease.id,
                status = %lease.status,
                "Applying payment to a lease that is no longer active"
            );
        }

        let Some(entry) = entry_from_transaction(transaction, &lease, EntrySource::Gateway) else {
            return Ok((false, Some(lease)));
        };
        let appended = self.store.append_payment_entry(lease.id, &entry).await?;
        if appended {
            metrics::record_ledger_entry(EntrySource::Gateway.as_str());
        } else {
            self.check_reference_holder(lease.id, &entry.reference, transaction)
                .await?;
        }

        match transaction.transaction_type {
            TransactionType::Rent => {
                let known = self
                    .store
                    .record_rent_payment(
                        transaction.apartment_id,
                        entry.date,
                        next_payment_due(entry.date),
                    )
                    .await?;
                if !known {
                    tracing::debug!(
                        apartment_id = %transaction.apartment_id,
                        "No apartment payment record to update"
                    );
                }
            }
            TransactionType::Utility => {
                if let Some(bill_id) = transaction.metadata.utility_bill_id {
                    let settled = self
                        .store
                        .settle_bill_share(bill_id, transaction.apartment_id, transaction.id, entry.date)
                        .await?;
                    let status = self.store.mark_bill_paid_if_settled(bill_id).await?;
                    tracing::info!(
                        bill_id = %bill_id,
                        share_settled = settled,
                        bill_status = ?status,
                        "Utility bill share processed"
                    );
                }
            }
            _ => {}
        }

        Ok((appended, Some(lease)))
    }

    /// The append was refused because the reference is taken. Anything but
    /// this transaction's own entry holding it means the payment is missing
    /// from the ledger.
    async fn check_reference_holder(
        &self,
        lease_id: Uuid,
        reference: &str,
        transaction: &Transaction,
    ) -> Result<(), PaymentError> {
        let Some(lease) = self.store.get_lease(lease_id).await? else {
            return Ok(());
        };
        let holder = lease
            .payment_history
            .iter()
            .find(|entry| entry.reference == reference);
        if let Some(holder) = holder.filter(|entry| entry.transaction_id != Some(transaction.id)) {
            metrics::record_reference_conflict();
            tracing::error!(
                transaction_id = %transaction.id,
                lease_id = %lease_id,
                reference = %reference,
                holder_source = holder.source.as_str(),
                holder_transaction_id = ?holder.transaction_id,
                "Receipt reference held by a foreign payment entry; payment not in ledger"
            );
        }
        Ok(())
    }
}
