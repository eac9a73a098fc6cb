mod common;

use common::{callback_payload, TestApp};
use rentbook_service::models::{EntrySource, EntryStatus, LeaseStatus};
use rentbook_service::services::LedgerStore;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn party_records_manual_payment() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;

    let response = app
        .client
        .post(app.url(&format!("/leases/{}/payments", lease.id)))
        .header("X-User-ID", lease.owner_id.to_string())
        .json(&json!({ "amount": "300", "method": "cash", "reference": "CASH-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reference"], "CASH-001");
    assert_eq!(body["status"], "partial");

    let history = app.lease(lease.id).await.payment_history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source, EntrySource::Manual);
    assert_eq!(history[0].status, EntryStatus::Partial);
}

#[tokio::test]
async fn reused_reference_is_a_conflict() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let url = app.url(&format!("/leases/{}/payments", lease.id));
    let body = json!({ "amount": 500, "method": "transfer", "reference": "BANK-42" });

    let first = app
        .client
        .post(&url)
        .header("X-User-ID", lease.tenant_id.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = app
        .client
        .post(&url)
        .header("X-User-ID", lease.tenant_id.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
    assert_eq!(app.lease(lease.id).await.payment_history.len(), 1);
}

#[tokio::test]
async fn outsiders_cannot_read_or_write_history() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let url = app.url(&format!("/leases/{}/payments", lease.id));
    let outsider = Uuid::new_v4().to_string();

    let read = app
        .client
        .get(&url)
        .header("X-User-ID", &outsider)
        .send()
        .await
        .unwrap();
    assert_eq!(read.status().as_u16(), 403);

    let write = app
        .client
        .post(&url)
        .header("X-User-ID", &outsider)
        .json(&json!({ "amount": 500, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(write.status().as_u16(), 403);
}

#[tokio::test]
async fn history_lists_entries_for_parties() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;

    app.client
        .post(app.url(&format!("/public/leases/{}/payments", lease.id)))
        .json(&json!({ "amount": 500, "method": "cash" }))
        .send()
        .await
        .unwrap();

    let body: Value = app
        .client
        .get(app.url(&format!("/leases/{}/payments", lease.id)))
        .header("X-User-ID", lease.tenant_id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let history = body["payment_history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0]["reference"].as_str().unwrap().starts_with("MAN-"));
    assert_eq!(history[0]["status"], "paid");
}

#[tokio::test]
async fn public_endpoint_is_gated_by_config() {
    let app = TestApp::spawn_with(|config| {
        config.payments.public_manual_payments_enabled = false;
    })
    .await;
    let lease = app.seed_lease(500).await;

    let response = app
        .client
        .post(app.url(&format!("/public/leases/{}/payments", lease.id)))
        .json(&json!({ "amount": 500, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(app.lease(lease.id).await.payment_history.is_empty());
}

#[tokio::test]
async fn ended_lease_refuses_payments() {
    let app = TestApp::spawn().await;
    let mut lease = app.seed_lease(500).await;
    lease.id = Uuid::new_v4();
    lease.status = LeaseStatus::Ended;
    app.store.insert_lease(&lease).await.unwrap();

    let response = app
        .client
        .post(app.url(&format!("/leases/{}/payments", lease.id)))
        .header("X-User-ID", lease.owner_id.to_string())
        .json(&json!({ "amount": 500, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;

    let response = app
        .client
        .post(app.url(&format!("/public/leases/{}/payments", lease.id)))
        .json(&json!({ "amount": -5, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
async fn manual_entry_cannot_claim_a_pending_receipt_number() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let tx = app.initiate_rent(&lease, 500).await;

    let response = app
        .client
        .post(app.url(&format!("/public/leases/{}/payments", lease.id)))
        .json(&json!({
            "amount": 10,
            "method": "cash",
            "reference": tx.metadata.receipt_number,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let result: Value = app
        .callback(&callback_payload(&tx, json!("0")))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(result["ledger_updated"], true);

    let history = app.lease(lease.id).await.payment_history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reference, tx.metadata.receipt_number);
    assert_eq!(history[0].transaction_id, Some(tx.id));
    assert_eq!(history[0].amount, rust_decimal::Decimal::from(500));
}
