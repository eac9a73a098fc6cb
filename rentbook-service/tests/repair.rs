mod common;

use common::{complete_transaction, TestApp};
use rentbook_service::models::{EntrySource, PaymentEntry};
use rentbook_service::services::{LedgerAuditor, LedgerStore};
use std::sync::Arc;

#[tokio::test]
async fn backfill_restores_missing_entries_once() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let tx = complete_transaction(&lease, 500, "REC-20240201-0001");
    app.store.insert_transaction(&tx).await.unwrap();

    let auditor = LedgerAuditor::new(app.store.clone());

    let report = auditor.detect_drift(lease.id).await.unwrap();
    assert_eq!(report.missing.len(), 1);
    assert!(!report.is_clean());

    let outcome = auditor.backfill_missing(lease.id).await.unwrap();
    assert_eq!(outcome.appended, vec!["REC-20240201-0001".to_string()]);

    let again = auditor.backfill_missing(lease.id).await.unwrap();
    assert!(again.appended.is_empty());

    let history = app.lease(lease.id).await.payment_history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source, EntrySource::Backfill);
    assert_eq!(history[0].transaction_id, Some(tx.id));
    assert!(auditor.detect_drift(lease.id).await.unwrap().is_clean());
}

#[tokio::test]
async fn dedupe_keeps_entry_matching_the_transaction() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let tx = complete_transaction(&lease, 500, "REC-20240201-0002");
    app.store.insert_transaction(&tx).await.unwrap();

    let genuine = PaymentEntry {
        date: tx.completed_at.unwrap(),
        amount: tx.amount.value,
        method: tx.payment_method.method_type,
        status: rentbook_service::models::EntryStatus::Paid,
        reference: tx.metadata.receipt_number.clone(),
        comment: None,
        source: EntrySource::Gateway,
        transaction_id: Some(tx.id),
    };
    let synthetic = PaymentEntry {
        date: tx.completed_at.unwrap() + chrono::Duration::days(3),
        source: EntrySource::Backfill,
        ..genuine.clone()
    };
    let snapshot = app.lease(lease.id).await;
    assert!(app
        .store
        .replace_payment_history(&snapshot, &[synthetic.clone(), genuine.clone()])
        .await
        .unwrap());

    let auditor = LedgerAuditor::new(app.store.clone());
    assert_eq!(auditor.detect_drift(lease.id).await.unwrap().duplicates.len(), 1);

    let preview = auditor.dedupe(lease.id, true).await.unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.removed.len(), 1);
    assert_eq!(app.lease(lease.id).await.payment_history.len(), 2);

    let applied = auditor.dedupe(lease.id, false).await.unwrap();
    assert_eq!(applied.removed, vec![synthetic]);

    let history = app.lease(lease.id).await.payment_history;
    assert_eq!(history, vec![genuine]);
}

#[tokio::test]
async fn batch_audit_and_backfill_cover_every_lease() {
    let app = TestApp::spawn().await;
    let clean = app.seed_lease(500).await;
    let drifted = app.seed_lease(300).await;
    app.store
        .insert_transaction(&complete_transaction(&drifted, 300, "REC-20240201-0003"))
        .await
        .unwrap();
    app.store
        .insert_transaction(&complete_transaction(&drifted, 300, "REC-20240301-0004"))
        .await
        .unwrap();

    let store: Arc<dyn LedgerStore> = app.store.clone();
    let auditor = LedgerAuditor::new(store);

    let (summary, reports) = auditor.audit_all().await.unwrap();
    assert_eq!(summary.leases_scanned, 2);
    assert_eq!(summary.leases_with_drift, 1);
    assert_eq!(summary.missing, 2);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].lease_id, drifted.id);

    let summary = auditor.backfill_all().await.unwrap();
    assert_eq!(summary.entries_appended, 2);
    assert!(summary.failures.is_empty());

    let (summary, _) = auditor.audit_all().await.unwrap();
    assert_eq!(summary.leases_with_drift, 0);
    assert!(app.lease(clean.id).await.payment_history.is_empty());
}

#[tokio::test]
async fn audit_flags_receipt_held_by_a_manual_entry() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let tx = complete_transaction(&lease, 500, "REC-20240201-0005");
    app.store.insert_transaction(&tx).await.unwrap();

    let squatter = PaymentEntry {
        date: tx.completed_at.unwrap(),
        amount: rust_decimal::Decimal::from(10),
        method: rentbook_service::models::PaymentMethodType::Cash,
        status: rentbook_service::models::EntryStatus::Partial,
        reference: tx.metadata.receipt_number.clone(),
        comment: None,
        source: EntrySource::Manual,
        transaction_id: None,
    };
    app.store.append_payment_entry(lease.id, &squatter).await.unwrap();

    let auditor = LedgerAuditor::new(app.store.clone());
    let report = auditor.detect_drift(lease.id).await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.conflicts, vec![squatter]);
    assert!(report.missing.is_empty());

    let (summary, _) = auditor.audit_all().await.unwrap();
    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.leases_with_drift, 1);
}
