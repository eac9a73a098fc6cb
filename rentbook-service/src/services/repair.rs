//! Offline consistency tools for lease payment histories.
//!
//! A history is consistent when it holds exactly one entry per complete
//! transaction of the lease, keyed by receipt number. These routines report
//! and repair drift from that state; they are run by operators through the
//! `ledger-repair` binary, never from the request path.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::error::PaymentError;
use super::ledger::{completion_time, entry_from_transaction};
use super::metrics;
use super::store::LedgerStore;
use crate::models::{EntrySource, Lease, PaymentEntry, Transaction, TransactionStatus};

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub reference: String,
    pub entries: Vec<PaymentEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub lease_id: Uuid,
    /// Complete transactions without a payment entry.
    pub missing: Vec<Transaction>,
    /// References held by more than one entry.
    pub duplicates: Vec<DuplicateGroup>,
    /// Entries whose transaction is not complete. Reported only.
    pub orphaned: Vec<PaymentEntry>,
    /// Entries holding a transaction's receipt number without deriving from
    /// that transaction. The payment itself is absent from the history and
    /// backfill cannot add it; an operator must re-reference the entry.
    pub conflicts: Vec<PaymentEntry>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.duplicates.is_empty()
            && self.orphaned.is_empty()
            && self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillOutcome {
    pub lease_id: Uuid,
    pub appended: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupeOutcome {
    pub lease_id: Uuid,
    pub removed: Vec<PaymentEntry>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub leases_scanned: usize,
    pub leases_with_drift: usize,
    pub missing: usize,
    pub duplicates: usize,
    pub orphaned: usize,
    pub conflicts: usize,
    pub entries_appended: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub lease_id: Uuid,
    pub error: String,
}

/// Conditional history rewrites attempted before `dedupe` gives up.
const DEDUPE_MAX_ATTEMPTS: u32 = 3;

pub struct LedgerAuditor {
    store: Arc<dyn LedgerStore>,
}

impl LedgerAuditor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    async fn load(&self, lease_id: Uuid) -> Result<(Lease, Vec<Transaction>), PaymentError> {
        let lease = self
            .store
            .get_lease(lease_id)
            .await?
            .ok_or(PaymentError::LeaseNotFound(lease_id))?;
        let transactions = self
            .store
            .list_transactions_for_lease(lease_id, None)
            .await?;
        Ok((lease, transactions))
    }

    pub async fn detect_drift(&self, lease_id: Uuid) -> Result<DriftReport, PaymentError> {
        let (lease, transactions) = self.load(lease_id).await?;
        Ok(drift_of(&lease, &transactions))
    }

    /// Append the entries of complete transactions missing from the history,
    /// built exactly as the reconciliation engine builds them.
    pub async fn backfill_missing(&self, lease_id: Uuid) -> Result<BackfillOutcome, PaymentError> {
        let (lease, transactions) = self.load(lease_id).await?;
        let report = drift_of(&lease, &transactions);

        let mut appended = Vec::new();
        for transaction in &report.missing {
            let Some(entry) = entry_from_transaction(transaction, &lease, EntrySource::Backfill)
            else {
                continue;
            };
            if self.store.append_payment_entry(lease.id, &entry).await? {
                metrics::record_ledger_entry(EntrySource::Backfill.as_str());
                tracing::info!(
                    lease_id = %lease.id,
                    transaction_id = %transaction.id,
                    reference = %entry.reference,
                    "Backfilled missing payment entry"
                );
                appended.push(entry.reference);
            }
        }

        Ok(BackfillOutcome { lease_id, appended })
    }

    /// Collapse entries sharing a reference down to one. The rewrite only
    /// lands on the history it was computed from; a concurrent append makes
    /// it start over.
    pub async fn dedupe(&self, lease_id: Uuid, dry_run: bool) -> Result<DedupeOutcome, PaymentError> {
        for attempt in 1..=DEDUPE_MAX_ATTEMPTS {
            let (lease, transactions) = self.load(lease_id).await?;
            let (kept, removed) = collapse_duplicates(&lease.payment_history, &transactions);

            if removed.is_empty() {
                tracing::info!(lease_id = %lease_id, "No duplicate payment entries");
            } else if dry_run {
                tracing::info!(lease_id = %lease_id, removed = removed.len(), "Dry run: would remove duplicate entries");
            } else if self.store.replace_payment_history(&lease, &kept).await? {
                tracing::warn!(lease_id = %lease_id, removed = removed.len(), "Removed duplicate payment entries");
            } else {
                tracing::warn!(lease_id = %lease_id, attempt, "Payment history changed during dedupe, retrying");
                continue;
            }

            return Ok(DedupeOutcome {
                lease_id,
                removed,
                dry_run,
            });
        }

        Err(PaymentError::HistoryChanged(lease_id))
    }

    pub async fn audit_all(&self) -> Result<(BatchSummary, Vec<DriftReport>), PaymentError> {
        let mut summary = BatchSummary::default();
        let mut reports = Vec::new();

        for lease_id in self.store.list_lease_ids().await? {
            summary.leases_scanned += 1;
            match self.detect_drift(lease_id).await {
                Ok(report) => {
                    if !report.is_clean() {
                        summary.leases_with_drift += 1;
                        summary.missing += report.missing.len();
                        summary.duplicates += report.duplicates.len();
                        summary.orphaned += report.orphaned.len();
                        summary.conflicts += report.conflicts.len();
                        tracing::warn!(
                            lease_id = %lease_id,
                            missing = report.missing.len(),
                            duplicates = report.duplicates.len(),
                            orphaned = report.orphaned.len(),
                            conflicts = report.conflicts.len(),
                            "Ledger drift detected"
                        );
                        reports.push(report);
                    }
                }
                Err(e) => {
                    tracing::error!(lease_id = %lease_id, error = %e, "Audit failed for lease");
                    summary.failures.push(BatchFailure {
                        lease_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok((summary, reports))
    }

    pub async fn backfill_all(&self) -> Result<BatchSummary, PaymentError> {
        let mut summary = BatchSummary::default();

        for lease_id in self.store.list_lease_ids().await? {
            summary.leases_scanned += 1;
            match self.backfill_missing(lease_id).await {
                Ok(outcome) => {
                    if !outcome.appended.is_empty() {
                        summary.leases_with_drift += 1;
                        summary.entries_appended += outcome.appended.len();
                    }
                }
                Err(e) => {
                    tracing::error!(lease_id = %lease_id, error = %e, "Backfill failed for lease");
                    summary.failures.push(BatchFailure {
                        lease_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }
}

fn drift_of(lease: &Lease, transactions: &[Transaction]) -> DriftReport {
    let by_receipt: HashMap<&str, &Transaction> = transactions
        .iter()
        .map(|tx| (tx.receipt_number(), tx))
        .collect();

    let mut conflicts = Vec::new();
    let mut orphaned = Vec::new();
    for entry in &lease.payment_history {
        let Some(tx) = by_receipt.get(entry.reference.as_str()) else {
            continue;
        };
        if entry.transaction_id != Some(tx.id) {
            conflicts.push(entry.clone());
        } else if tx.status != TransactionStatus::Complete {
            orphaned.push(entry.clone());
        }
    }

    // A complete transaction whose receipt is held by a foreign entry shows
    // up under `conflicts` only, since backfill cannot append it.
    let missing = transactions
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Complete)
        .filter(|tx| !lease.has_reference(tx.receipt_number()))
        .cloned()
        .collect();

    let duplicates = group_by_reference(&lease.payment_history)
        .into_iter()
        .filter(|(_, indexes)| indexes.len() > 1)
        .map(|(reference, indexes)| DuplicateGroup {
            reference: reference.to_string(),
            entries: indexes
                .iter()
                .map(|&i| lease.payment_history[i].clone())
                .collect(),
        })
        .collect();

    DriftReport {
        lease_id: lease.id,
        missing,
        duplicates,
        orphaned,
        conflicts,
    }
}

/// Entry indexes per reference, in order of first appearance.
fn group_by_reference(history: &[PaymentEntry]) -> Vec<(&str, Vec<usize>)> {
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (i, entry) in history.iter().enumerate() {
        match positions.get(entry.reference.as_str()) {
            Some(&group) => groups[group].1.push(i),
            None => {
                positions.insert(entry.reference.as_str(), groups.len());
                groups.push((entry.reference.as_str(), vec![i]));
            }
        }
    }
    groups
}

/// Pick the survivor of a duplicate group: the entry dated at the
/// transaction's completion, else the first non-backfilled one, else the
/// first.
fn survivor(history: &[PaymentEntry], indexes: &[usize], transaction: Option<&Transaction>) -> usize {
    let completed_at = transaction
        .filter(|tx| tx.status == TransactionStatus::Complete)
        .map(completion_time);

    completed_at
        .and_then(|at| indexes.iter().copied().find(|&i| history[i].date == at))
        .or_else(|| {
            indexes
                .iter()
                .copied()
                .find(|&i| history[i].source != EntrySource::Backfill)
        })
        .unwrap_or(indexes[0])
}

/// Returns the history with duplicates removed (order otherwise kept) and
/// the removed entries.
fn collapse_duplicates(
    history: &[PaymentEntry],
    transactions: &[Transaction],
) -> (Vec<PaymentEntry>, Vec<PaymentEntry>) {
    let by_receipt: HashMap<&str, &Transaction> = transactions
        .iter()
        .map(|tx| (tx.receipt_number(), tx))
        .collect();

    let mut discard: HashSet<usize> = HashSet::new();
    for (reference, indexes) in group_by_reference(history) {
        if indexes.len() < 2 {
            continue;
        }
        let keep = survivor(history, &indexes, by_receipt.get(reference).copied());
        discard.extend(indexes.into_iter().filter(|&i| i != keep));
    }

    let mut kept = Vec::with_capacity(history.len() - discard.len());
    let mut removed = Vec::with_capacity(discard.len());
    for (i, entry) in history.iter().enumerate() {
        if discard.contains(&i) {
            removed.push(entry.clone());
        } else {
            kept.push(entry.clone());
        }
    }
    (kept, removed)
}
