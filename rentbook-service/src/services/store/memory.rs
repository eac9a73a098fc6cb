use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GatewayUpdate, LedgerStore, Settlement, StoreError, StoreResult};
use crate::models::{
    ApartmentPaymentStatus, BillStatus, Lease, PaymentEntry, ShareStatus, Transaction,
    TransactionStatus, UtilityBill,
};

/// Process-local store with the same conditional-write semantics as
/// [`super::MongoLedgerStore`]. Each operation holds the collection lock for
/// its whole read-modify-write.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    leases: RwLock<HashMap<Uuid, Lease>>,
    transactions: RwLock<HashMap<Uuid, Transaction>>,
    bills: RwLock<HashMap<Uuid, UtilityBill>>,
    apartments: RwLock<HashMap<Uuid, ApartmentPaymentStatus>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_lease(&self, lease: &Lease) -> StoreResult<()> {
        let mut leases = self.leases.write().await;
        if leases.contains_key(&lease.id) {
            return Err(StoreError::DuplicateKey(format!("lease {}", lease.id)));
        }
        leases.insert(lease.id, lease.clone());
        Ok(())
    }

    async fn get_lease(&self, id: Uuid) -> StoreResult<Option<Lease>> {
        Ok(self.leases.read().await.get(&id).cloned())
    }

    async fn list_lease_ids(&self) -> StoreResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.leases.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_payment_entry(
        &self,
        lease_id: Uuid,
        entry: &PaymentEntry,
    ) -> StoreResult<bool> {
        let mut leases = self.leases.write().await;
        let Some(lease) = leases.get_mut(&lease_id) else {
            return Ok(false);
        };
        if lease.has_reference(&entry.reference) {
            return Ok(false);
        }
        lease.payment_history.push(entry.clone());
        lease.updated_at = Utc::now();
        Ok(true)
    }

    async fn replace_payment_history(
        &self,
        snapshot: &Lease,
        entries: &[PaymentEntry],
    ) -> StoreResult<bool> {
        let mut leases = self.leases.write().await;
        let Some(lease) = leases.get_mut(&snapshot.id) else {
            return Ok(false);
        };
        if lease.updated_at != snapshot.updated_at
            || lease.payment_history.len() != snapshot.payment_history.len()
        {
            return Ok(false);
        }
        lease.payment_history = entries.to_vec();
        lease.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
        let mut transactions = self.transactions.write().await;
        let receipt = transaction.receipt_number();
        if transactions
            .values()
            .any(|existing| existing.receipt_number() == receipt)
        {
            return Err(StoreError::DuplicateKey(format!(
                "metadata.receipt_number {}",
                receipt
            )));
        }
        if transactions.contains_key(&transaction.id) {
            return Err(StoreError::DuplicateKey(format!(
                "transaction {}",
                transaction.id
            )));
        }
        transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self.transactions.read().await.get(&id).cloned())
    }

    async fn find_transaction_by_receipt(
        &self,
        receipt_number: &str,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .find(|tx| tx.receipt_number() == receipt_number)
            .cloned())
    }

    async fn find_transaction_by_gateway_key(
        &self,
        key: &str,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .find(|tx| tx.matches_gateway_key(key))
            .cloned())
    }

    async fn list_transactions_for_lease(
        &self,
        lease_id: Uuid,
        status: Option<TransactionStatus>,
    ) -> StoreResult<Vec<Transaction>> {
        let mut found: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.lease_id == Some(lease_id))
            .filter(|tx| status.map_or(true, |s| tx.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|tx| tx.created_at);
        Ok(found)
    }

    async fn record_gateway_response(
        &self,
        id: Uuid,
        update: &GatewayUpdate,
    ) -> StoreResult<bool> {
        let mut transactions = self.transactions.write().await;
        let Some(tx) = transactions.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(reference) = &update.reference {
            tx.payment_method.reference = Some(reference.clone());
        }
        if let Some(order_number) = &update.order_number {
            tx.payment_method.order_number = Some(order_number.clone());
        }
        if tx.status == TransactionStatus::Pending {
            if let Some(response) = &update.provider_response {
                tx.payment_method.provider_response = Some(response.clone());
            }
            if let Some(error) = &update.provider_error {
                tx.metadata.provider_error = Some(error.clone());
            }
        }
        tx.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_if_pending(
        &self,
        id: Uuid,
        settlement: &Settlement,
    ) -> StoreResult<Option<Transaction>> {
        let mut transactions = self.transactions.write().await;
        let Some(tx) = transactions.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status != TransactionStatus::Pending {
            return Ok(None);
        }
        tx.status = settlement.status;
        tx.payment_method.status = settlement.method_status;
        tx.payment_method.provider_response = Some(settlement.provider_response.clone());
        tx.updated_at = settlement.at;
        if settlement.status == TransactionStatus::Complete {
            tx.completed_at = Some(settlement.at);
        }
        Ok(Some(tx.clone()))
    }

    async fn insert_utility_bill(&self, bill: &UtilityBill) -> StoreResult<()> {
        let mut bills = self.bills.write().await;
        if bills.contains_key(&bill.id) {
            return Err(StoreError::DuplicateKey(format!("utility bill {}", bill.id)));
        }
        bills.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn get_utility_bill(&self, id: Uuid) -> StoreResult<Option<UtilityBill>> {
        Ok(self.bills.read().await.get(&id).cloned())
    }

    async fn settle_bill_share(
        &self,
        bill_id: Uuid,
        apartment_id: Uuid,
        transaction_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut bills = self.bills.write().await;
        let Some(bill) = bills.get_mut(&bill_id) else {
            return Ok(false);
        };
        let Some(share) = bill
            .distribution
            .iter_mut()
            .find(|s| s.apartment_id == apartment_id && s.status == ShareStatus::Unpaid)
        else {
            return Ok(false);
        };
        share.status = ShareStatus::Paid;
        share.transaction_id = Some(transaction_id);
        share.paid_at = Some(at);
        bill.updated_at = at;
        Ok(true)
    }

    async fn mark_bill_paid_if_settled(&self, bill_id: Uuid) -> StoreResult<Option<BillStatus>> {
        let mut bills = self.bills.write().await;
        let Some(bill) = bills.get_mut(&bill_id) else {
            return Ok(None);
        };
        let settled = bill.settled_status();
        let advance = matches!(
            (bill.status, settled),
            (BillStatus::Unpaid, BillStatus::Partial)
                | (BillStatus::Unpaid, BillStatus::Paid)
                | (BillStatus::Partial, BillStatus::Paid)
        );
        if advance {
            bill.status = settled;
            bill.updated_at = Utc::now();
        }
        Ok(Some(bill.status))
    }

    async fn insert_apartment(&self, apartment: &ApartmentPaymentStatus) -> StoreResult<()> {
        self.apartments
            .write()
            .await
            .insert(apartment.id, apartment.clone());
        Ok(())
    }

    async fn get_apartment(&self, id: Uuid) -> StoreResult<Option<ApartmentPaymentStatus>> {
        Ok(self.apartments.read().await.get(&id).cloned())
    }

    async fn record_rent_payment(
        &self,
        apartment_id: Uuid,
        paid_at: DateTime<Utc>,
        next_due: NaiveDate,
    ) -> StoreResult<bool> {
        let mut apartments = self.apartments.write().await;
        let Some(apartment) = apartments.get_mut(&apartment_id) else {
            return Ok(false);
        };
        // Out-of-order deliveries must not move the dates backwards.
        if apartment.last_payment_date.map_or(true, |last| paid_at >= last) {
            apartment.last_payment_date = Some(paid_at);
            apartment.next_payment_due = Some(next_due);
            apartment.updated_at = Utc::now();
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillShare, EntrySource, EntryStatus, Money};
    use crate::services::ledger::tests::{lease, transaction};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;

    fn entry(reference: &str) -> PaymentEntry {
        PaymentEntry {
            date: Utc::now(),
            amount: Decimal::from(500),
            method: crate::models::PaymentMethodType::Cash,
            status: EntryStatus::Paid,
            reference: reference.to_string(),
            comment: None,
            source: EntrySource::Manual,
            transaction_id: None,
        }
    }

    fn bill(apartments: &[Uuid]) -> UtilityBill {
        let now = Utc::now();
        UtilityBill {
            id: Uuid::new_v4(),
            landlord_id: Uuid::new_v4(),
            description: "Water".to_string(),
            total: Money {
                value: Decimal::from(100 * apartments.len() as i64),
                currency: crate::models::Currency::Usd,
            },
            due_date: None,
            status: BillStatus::Unpaid,
            distribution: apartments
                .iter()
                .map(|id| BillShare {
                    apartment_id: *id,
                    amount: Decimal::from(100),
                    status: ShareStatus::Unpaid,
                    transaction_id: None,
                    paid_at: None,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn append_is_guarded_by_reference() {
        let store = InMemoryLedgerStore::new();
        let lease = lease(500);
        store.insert_lease(&lease).await.unwrap();

        assert!(store.append_payment_entry(lease.id, &entry("R-1")).await.unwrap());
        assert!(!store.append_payment_entry(lease.id, &entry("R-1")).await.unwrap());
        assert!(store.append_payment_entry(lease.id, &entry("R-2")).await.unwrap());
        assert!(!store
            .append_payment_entry(Uuid::new_v4(), &entry("R-3"))
            .await
            .unwrap());

        let stored = store.get_lease(lease.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_history.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_appends_of_one_reference_keep_one_entry() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let lease = lease(500);
        store.insert_lease(&lease).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append_payment_entry(lease.id, &entry("R-1")).await })
            })
            .collect();
        let mut appended = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                appended += 1;
            }
        }

        assert_eq!(appended, 1);
        let stored = store.get_lease(lease.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_history.len(), 1);
    }

    #[tokio::test]
    async fn receipt_number_collision_is_a_duplicate_key() {
        let store = InMemoryLedgerStore::new();
        let lease = lease(500);
        let first = transaction(&lease, 500, TransactionStatus::Pending);
        let mut second = transaction(&lease, 500, TransactionStatus::Pending);
        second.metadata.receipt_number = first.metadata.receipt_number.clone();

        store.insert_transaction(&first).await.unwrap();
        let err = store.insert_transaction(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn only_the_first_transition_from_pending_wins() {
        let store = InMemoryLedgerStore::new();
        let lease = lease(500);
        let tx = transaction(&lease, 500, TransactionStatus::Pending);
        store.insert_transaction(&tx).await.unwrap();

        let done = store
            .transition_if_pending(tx.id, &Settlement::complete(json!({"code": "0"}), Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, TransactionStatus::Complete);
        assert!(done.completed_at.is_some());

        let late = store
            .transition_if_pending(tx.id, &Settlement::failed(json!({"code": "1"}), Utc::now()))
            .await
            .unwrap();
        assert!(late.is_none());

        let stored = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Complete);
        assert_eq!(stored.payment_method.provider_response, Some(json!({"code": "0"})));
    }

    #[tokio::test]
    async fn late_acknowledgement_still_records_identifiers() {
        let store = InMemoryLedgerStore::new();
        let lease = lease(500);
        let tx = transaction(&lease, 500, TransactionStatus::Pending);
        store.insert_transaction(&tx).await.unwrap();
        store
            .transition_if_pending(tx.id, &Settlement::complete(json!({"code": "0"}), Utc::now()))
            .await
            .unwrap();

        let update = GatewayUpdate {
            reference: Some("RB-echoed".to_string()),
            order_number: Some("ORD-9".to_string()),
            provider_response: Some(json!({"code": "0", "orderNumber": "ORD-9"})),
            provider_error: Some("late".to_string()),
        };
        assert!(store.record_gateway_response(tx.id, &update).await.unwrap());
        assert!(!store
            .record_gateway_response(Uuid::new_v4(), &update)
            .await
            .unwrap());

        let stored = store.find_transaction_by_gateway_key("ORD-9").await.unwrap().unwrap();
        assert_eq!(stored.id, tx.id);
        assert_eq!(stored.payment_method.reference.as_deref(), Some("RB-echoed"));
        assert_eq!(stored.payment_method.provider_response, Some(json!({"code": "0"})));
        assert_eq!(stored.metadata.provider_error, None);
    }

    #[tokio::test]
    async fn history_replacement_refuses_a_stale_snapshot() {
        let store = InMemoryLedgerStore::new();
        let lease = lease(500);
        store.insert_lease(&lease).await.unwrap();
        store.append_payment_entry(lease.id, &entry("R-1")).await.unwrap();
        let snapshot = store.get_lease(lease.id).await.unwrap().unwrap();

        store.append_payment_entry(lease.id, &entry("R-2")).await.unwrap();
        assert!(!store.replace_payment_history(&snapshot, &[]).await.unwrap());
        let stored = store.get_lease(lease.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_history.len(), 2);

        assert!(store.replace_payment_history(&stored, &[]).await.unwrap());
        let stored = store.get_lease(lease.id).await.unwrap().unwrap();
        assert!(stored.payment_history.is_empty());
    }

    #[tokio::test]
    async fn finds_transactions_by_receipt_number() {
        let store = InMemoryLedgerStore::new();
        let lease = lease(500);
        let tx = transaction(&lease, 500, TransactionStatus::Pending);
        store.insert_transaction(&tx).await.unwrap();

        let found = store
            .find_transaction_by_receipt(tx.receipt_number())
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.id), Some(tx.id));
        assert!(store
            .find_transaction_by_receipt("REC-19990101-0000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bill_status_follows_settled_shares() {
        let store = InMemoryLedgerStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let bill = bill(&[a, b]);
        store.insert_utility_bill(&bill).await.unwrap();

        assert!(store.settle_bill_share(bill.id, a, Uuid::new_v4(), Utc::now()).await.unwrap());
        assert!(!store.settle_bill_share(bill.id, a, Uuid::new_v4(), Utc::now()).await.unwrap());
        assert_eq!(
            store.mark_bill_paid_if_settled(bill.id).await.unwrap(),
            Some(BillStatus::Partial)
        );

        assert!(store.settle_bill_share(bill.id, b, Uuid::new_v4(), Utc::now()).await.unwrap());
        assert_eq!(
            store.mark_bill_paid_if_settled(bill.id).await.unwrap(),
            Some(BillStatus::Paid)
        );
        assert_eq!(store.mark_bill_paid_if_settled(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn apartment_dates_only_move_forward() {
        let store = InMemoryLedgerStore::new();
        let apartment = ApartmentPaymentStatus::new(Uuid::new_v4());
        store.insert_apartment(&apartment).await.unwrap();

        let march = Utc::now();
        let february = march - chrono::Duration::days(30);
        let march_due = crate::services::ledger::next_payment_due(march);

        assert!(store.record_rent_payment(apartment.id, march, march_due).await.unwrap());
        assert!(store
            .record_rent_payment(apartment.id, february, crate::services::ledger::next_payment_due(february))
            .await
            .unwrap());

        let stored = store.get_apartment(apartment.id).await.unwrap().unwrap();
        assert_eq!(stored.last_payment_date, Some(march));
        assert_eq!(stored.next_payment_due, Some(march_due));
        assert!(!store
            .record_rent_payment(Uuid::new_v4(), march, march_due)
            .await
            .unwrap());
    }
}
