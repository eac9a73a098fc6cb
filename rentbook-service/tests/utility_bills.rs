mod common;

use chrono::Utc;
use common::{callback_payload, TestApp};
use rentbook_service::models::{BillShare, BillStatus, Money, ShareStatus, UtilityBill};
use rentbook_service::services::LedgerStore;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn utility_payment_settles_share_and_bill() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;
    let now = Utc::now();
    let bill = UtilityBill {
        id: Uuid::new_v4(),
        landlord_id: lease.owner_id,
        description: "Water, February".to_string(),
        total: Money {
            value: Decimal::from(40),
            currency: lease.currency,
        },
        due_date: None,
        status: BillStatus::Unpaid,
        distribution: vec![BillShare {
            apartment_id: lease.apartment_id,
            amount: Decimal::from(40),
            status: ShareStatus::Unpaid,
            transaction_id: None,
            paid_at: None,
        }],
        created_at: now,
        updated_at: now,
    };
    app.store.insert_utility_bill(&bill).await.unwrap();

    let response = app
        .initiate(
            lease.tenant_id,
            json!({
                "lease_id": lease.id,
                "amount": 40,
                "phone": "+243990000001",
                "currency": "USD",
                "type": "utility",
                "utility_bill_id": bill.id
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let id: Uuid = serde_json::from_value(body["transaction"]["id"].clone()).unwrap();
    let tx = app.store.get_transaction(id).await.unwrap().unwrap();

    app.callback(&callback_payload(&tx, json!("0"))).await;
    app.callback(&callback_payload(&tx, json!("0"))).await;

    let bill = app.store.get_utility_bill(bill.id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Paid);
    assert_eq!(bill.distribution[0].status, ShareStatus::Paid);
    assert_eq!(bill.distribution[0].transaction_id, Some(tx.id));

    // The paid share cannot be paid again.
    let again = app
        .initiate(
            lease.tenant_id,
            json!({
                "lease_id": lease.id,
                "amount": 40,
                "phone": "+243990000001",
                "currency": "USD",
                "type": "utility",
                "utility_bill_id": bill.id
            }),
        )
        .await;
    assert_eq!(again.status().as_u16(), 400);
}

#[tokio::test]
async fn utility_payment_requires_a_bill() {
    let app = TestApp::spawn().await;
    let lease = app.seed_lease(500).await;

    let response = app
        .initiate(
            lease.tenant_id,
            json!({
                "lease_id": lease.id,
                "amount": 40,
                "phone": "0990000001",
                "currency": "USD",
                "type": "utility"
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}
