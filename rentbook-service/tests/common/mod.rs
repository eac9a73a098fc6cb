#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use rentbook_service::config::Config;
use rentbook_service::models::{
    ApartmentPaymentStatus, Currency, Lease, LeaseStatus, Money, PaymentMethodDetails,
    PaymentMethodStatus, PaymentMethodType, Transaction, TransactionMetadata, TransactionStatus,
    TransactionType,
};
use rentbook_service::services::{
    InMemoryLedgerStore, LedgerStore, MockGateway, MockMessagingProvider,
};
use rentbook_service::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const CALLBACK_TOKEN: &str = "test-callback-token";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub store: Arc<InMemoryLedgerStore>,
    pub gateway: Arc<MockGateway>,
    pub messaging: Arc<MockMessagingProvider>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with the in-memory store and mock providers, after letting the
    /// caller adjust the configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::for_local();
        config.gateway.callback_token = Some(Secret::new(CALLBACK_TOKEN.to_string()));
        configure(&mut config);

        let store = Arc::new(InMemoryLedgerStore::new());
        let gateway = Arc::new(MockGateway::new());
        let messaging = Arc::new(MockMessagingProvider::new());

        let app = Application::build_with(config, store.clone(), gateway.clone(), messaging.clone())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept connections by polling /health
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            store,
            gateway,
            messaging,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Active USD lease with an apartment payment record.
    pub async fn seed_lease(&self, monthly_rent: i64) -> Lease {
        let now = Utc::now();
        let lease = Lease {
            id: Uuid::new_v4(),
            apartment_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            tenant_phone: Some("+243990000001".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            monthly_rent: Decimal::from(monthly_rent),
            security_deposit: Decimal::from(monthly_rent * 2),
            currency: Currency::Usd,
            payment_history: Vec::new(),
            status: LeaseStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_lease(&lease).await.unwrap();
        self.store
            .insert_apartment(&ApartmentPaymentStatus::new(lease.apartment_id))
            .await
            .unwrap();
        lease
    }

    pub async fn initiate(&self, actor: Uuid, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/payments/initiate"))
            .header("X-User-ID", actor.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Initiate a rent payment as the tenant and return the created transaction.
    pub async fn initiate_rent(&self, lease: &Lease, amount: i64) -> Transaction {
        let response = self
            .initiate(
                lease.tenant_id,
                json!({
                    "lease_id": lease.id,
                    "amount": amount,
                    "phone": "0990000001",
                    "currency": "USD"
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);

        let body: Value = response.json().await.unwrap();
        let id: Uuid = serde_json::from_value(body["transaction"]["id"].clone()).unwrap();
        self.store.get_transaction(id).await.unwrap().unwrap()
    }

    pub async fn callback(&self, payload: &Value) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/payments/callback?token={}", CALLBACK_TOKEN)))
            .json(payload)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn lease(&self, lease_id: Uuid) -> Lease {
        self.store.get_lease(lease_id).await.unwrap().unwrap()
    }
}

pub fn callback_payload(transaction: &Transaction, code: Value) -> Value {
    json!({
        "code": code,
        "reference": transaction.payment_method.reference,
        "orderNumber": transaction.payment_method.order_number,
        "amount": transaction.amount.value.to_string(),
        "amountCustomer": transaction.amount.value.to_string(),
        "phone": "243990000001",
        "currency": "USD",
        "createdAt": "2024-02-01 10:00:00",
        "channel": "mpesa"
    })
}

/// A settled mobile-money rent transaction, as the engine leaves it.
pub fn complete_transaction(lease: &Lease, amount: i64, receipt: &str) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: Uuid::new_v4(),
        lease_id: Some(lease.id),
        apartment_id: lease.apartment_id,
        tenant_id: lease.tenant_id,
        landlord_id: lease.owner_id,
        transaction_type: TransactionType::Rent,
        amount: Money {
            value: Decimal::from(amount),
            currency: lease.currency,
        },
        payment_method: PaymentMethodDetails {
            method_type: PaymentMethodType::MobileMoney,
            provider: "mobile_money".to_string(),
            phone: lease.tenant_phone.clone(),
            reference: Some(format!("RB-{}", receipt)),
            order_number: None,
            provider_response: Some(json!({ "code": "0" })),
            status: PaymentMethodStatus::Completed,
        },
        status: TransactionStatus::Complete,
        metadata: TransactionMetadata {
            receipt_number: receipt.to_string(),
            utility_bill_id: None,
            description: None,
            provider_error: None,
        },
        created_at: now,
        updated_at: now,
        completed_at: Some(now),
    }
}
