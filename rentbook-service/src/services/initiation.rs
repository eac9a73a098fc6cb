use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error::PaymentError;
use super::gateway::{GatewayError, InitiatePayment, PaymentGateway};
use super::metrics;
use super::reconciliation::ReconciliationEngine;
use super::scheduler::VerificationScheduler;
use super::store::{GatewayUpdate, LedgerStore, Settlement, StoreError};
use crate::config::{GatewayConfig, PaymentsConfig};
use crate::models::{
    Currency, Lease, Money, PaymentMethodDetails, PaymentMethodStatus, PaymentMethodType,
    ShareStatus, Transaction, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::utils::{gateway_digits, gateway_reference, normalize_phone, receipt_number};

pub const MOBILE_MONEY_PROVIDER: &str = "mobile_money";

/// Produces candidate receipt numbers; the store decides uniqueness.
pub type ReceiptGenerator = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub lease_id: Uuid,
    pub amount: Decimal,
    pub phone: String,
    pub currency: Currency,
    pub transaction_type: TransactionType,
    pub utility_bill_id: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiateResponse {
    pub transaction: Transaction,
    pub provider_payload: Value,
}

/// Opens pending transactions and hands them to the gateway.
#[derive(Clone)]
pub struct PaymentInitiationService {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    engine: ReconciliationEngine,
    scheduler: VerificationScheduler,
    gateway_config: GatewayConfig,
    payments_config: PaymentsConfig,
    receipts: ReceiptGenerator,
}

impl PaymentInitiationService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        engine: ReconciliationEngine,
        scheduler: VerificationScheduler,
        gateway_config: GatewayConfig,
        payments_config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            engine,
            scheduler,
            gateway_config,
            payments_config,
            receipts: Arc::new(receipt_number),
        }
    }

    pub fn with_receipt_generator(mut self, receipts: ReceiptGenerator) -> Self {
        self.receipts = receipts;
        self
    }

    /// Callback URL registered with the gateway, carrying the shared token
    /// when one is configured.
    pub fn callback_url(&self) -> String {
        let base = &self.gateway_config.callback_url;
        match &self.gateway_config.callback_token {
            Some(token) => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", base, separator, token.expose_secret())
            }
            None => base.clone(),
        }
    }

    pub async fn initiate(
        &self,
        actor: Uuid,
        request: InitiateRequest,
    ) -> Result<InitiateResponse, PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }

        let lease = self
            .store
            .get_lease(request.lease_id)
            .await?
            .ok_or(PaymentError::LeaseNotFound(request.lease_id))?;
        if !lease.is_party(actor) {
            return Err(PaymentError::NotLeaseParty(lease.id));
        }
        if !lease.is_active() {
            return Err(PaymentError::LeaseInactive {
                lease_id: lease.id,
                status: lease.status,
            });
        }
        if request.currency != lease.currency {
            return Err(PaymentError::InvalidRequest(format!(
                "lease is billed in {}, not {}",
                lease.currency, request.currency
            )));
        }

        let phone = normalize_phone(&request.phone, &self.payments_config.default_country_code)?;
        self.check_utility_bill(&lease, &request).await?;

        let transaction = self.open_transaction(&lease, &request, phone).await?;
        let reference = transaction
            .payment_method
            .reference
            .clone()
            .unwrap_or_default();

        tracing::info!(
            transaction_id = %transaction.id,
            lease_id = %lease.id,
            receipt_number = %transaction.receipt_number(),
            reference = %reference,
            amount = %request.amount,
            "Payment transaction opened"
        );

        let gateway_request = InitiatePayment {
            phone: gateway_digits(transaction.payment_method.phone.as_deref().unwrap_or_default()),
            reference: reference.clone(),
            amount: request.amount,
            currency: request.currency,
            callback_url: self.callback_url(),
        };

        match self.gateway.initiate(&gateway_request).await {
            Ok(accepted) => {
                // The echoed reference supersedes ours before anything looks
                // the transaction up by reference.
                let update = GatewayUpdate {
                    reference: accepted.reference.clone().filter(|r| *r != reference),
                    order_number: accepted.order_number.clone(),
                    provider_response: Some(accepted.raw.clone()),
                    provider_error: None,
                };
                self.store
                    .record_gateway_response(transaction.id, &update)
                    .await?;

                let lookup_key = accepted
                    .order_number
                    .clone()
                    .or(accepted.reference.clone())
                    .unwrap_or(reference);
                self.schedule_verification(transaction.id, lookup_key);
                metrics::record_initiation(request.transaction_type.as_str(), "accepted");

                let transaction = self
                    .store
                    .get_transaction(transaction.id)
                    .await?
                    .unwrap_or(transaction);
                Ok(InitiateResponse {
                    transaction,
                    provider_payload: accepted.raw,
                })
            }
            Err(GatewayError::Rejected { message, raw }) => {
                self.store
                    .transition_if_pending(transaction.id, &Settlement::failed(raw, Utc::now()))
                    .await?;
                metrics::record_initiation(request.transaction_type.as_str(), "rejected");
                tracing::warn!(
                    transaction_id = %transaction.id,
                    message = %message,
                    "Payment initiation rejected by gateway"
                );
                Err(PaymentError::GatewayRejected(message))
            }
            Err(GatewayError::NotConfigured) => {
                let raw = json!({ "error": "gateway not configured" });
                self.store
                    .transition_if_pending(transaction.id, &Settlement::failed(raw, Utc::now()))
                    .await?;
                metrics::record_initiation(request.transaction_type.as_str(), "not_configured");
                Err(PaymentError::GatewayNotConfigured)
            }
            Err(err) => {
                // The push may still have reached the payer; keep the
                // transaction open for the deferred poll.
                let detail = err.to_string();
                self.store
                    .record_gateway_response(
                        transaction.id,
                        &GatewayUpdate {
                            provider_error: Some(detail.clone()),
                            ..GatewayUpdate::default()
                        },
                    )
                    .await?;
                self.schedule_verification(transaction.id, reference);
                metrics::record_initiation(request.transaction_type.as_str(), "unavailable");
                tracing::error!(
                    transaction_id = %transaction.id,
                    error = %detail,
                    "Payment gateway call failed"
                );
                Err(PaymentError::GatewayUnavailable(detail))
            }
        }
    }

    async fn check_utility_bill(
        &self,
        lease: &Lease,
        request: &InitiateRequest,
    ) -> Result<(), PaymentError> {
        match (request.transaction_type, request.utility_bill_id) {
            (TransactionType::Utility, None) => Err(PaymentError::InvalidRequest(
                "utility payments require utility_bill_id".to_string(),
            )),
            (TransactionType::Utility, Some(bill_id)) => {
                let bill = self
                    .store
                    .get_utility_bill(bill_id)
                    .await?
                    .ok_or(PaymentError::UtilityBillNotFound(bill_id))?;
                match bill.share_for(lease.apartment_id) {
                    Some(share) if share.status == ShareStatus::Unpaid => Ok(()),
                    Some(_) => Err(PaymentError::InvalidRequest(
                        "utility bill share is already paid".to_string(),
                    )),
                    None => Err(PaymentError::InvalidRequest(
                        "utility bill has no share for this apartment".to_string(),
                    )),
                }
            }
            (_, Some(_)) => Err(PaymentError::InvalidRequest(
                "utility_bill_id is only valid for utility payments".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }

    /// Insert the pending transaction, regenerating the receipt number on
    /// collision.
    async fn open_transaction(
        &self,
        lease: &Lease,
        request: &InitiateRequest,
        phone: String,
    ) -> Result<Transaction, PaymentError> {
        let max_attempts = self.payments_config.receipt_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let now = Utc::now();
            let id = Uuid::new_v4();
            let transaction = Transaction {
                id,
                lease_id: Some(lease.id),
                apartment_id: lease.apartment_id,
                tenant_id: lease.tenant_id,
                landlord_id: lease.owner_id,
                transaction_type: request.transaction_type,
                amount: Money {
                    value: request.amount,
                    currency: request.currency,
                },
                payment_method: PaymentMethodDetails {
                    method_type: PaymentMethodType::MobileMoney,
                    provider: MOBILE_MONEY_PROVIDER.to_string(),
                    phone: Some(phone.clone()),
                    reference: Some(gateway_reference(id, lease.id, now)),
                    order_number: None,
                    provider_response: None,
                    status: PaymentMethodStatus::Pending,
                },
                status: TransactionStatus::Pending,
                metadata: TransactionMetadata {
                    receipt_number: (self.receipts)(now),
                    utility_bill_id: request.utility_bill_id,
                    description: request.description.clone(),
                    provider_error: None,
                },
                created_at: now,
                updated_at: now,
                completed_at: None,
            };

            match self.store.insert_transaction(&transaction).await {
                Ok(()) => return Ok(transaction),
                Err(StoreError::DuplicateKey(key)) => {
                    tracing::warn!(attempt, key = %key, "Receipt number collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PaymentError::ReceiptCollision(max_attempts))
    }

    fn schedule_verification(&self, transaction_id: Uuid, lookup_key: String) {
        let engine = self.engine.clone();
        let delay = Duration::from_secs(self.gateway_config.verify_delay_secs);
        self.scheduler.schedule(transaction_id, delay, async move {
            let result = engine.verify_by_order_number(&lookup_key).await?;
            tracing::info!(
                transaction_id = %result.transaction.id,
                status = %result.transaction.status,
                ledger_updated = result.ledger_updated,
                "Deferred verification finished"
            );
            Ok::<(), anyhow::Error>(())
        });
    }
}
