use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::{GatewayUpdate, LedgerStore, Settlement, StoreError, StoreResult};
use crate::models::{
    ApartmentPaymentStatus, BillStatus, Lease, PaymentEntry, ShareStatus, Transaction,
    TransactionStatus, UtilityBill,
};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed ledger.
///
/// Documents are persisted in their JSON shape: ids, decimals and
/// timestamps are strings, so filters compare against `to_string()` values.
#[derive(Clone)]
pub struct MongoLedgerStore {
    db: Database,
    leases: Collection<Document>,
    transactions: Collection<Document>,
    bills: Collection<Document>,
    apartments: Collection<Document>,
}

impl MongoLedgerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            leases: db.collection("leases"),
            transactions: db.collection("transactions"),
            bills: db.collection("utility_bills"),
            apartments: db.collection("apartments"),
        }
    }

    pub async fn init_indexes(&self) -> StoreResult<()> {
        // Receipt numbers double as payment entry references.
        let receipt_index = IndexModel::builder()
            .keys(doc! { "metadata.receipt_number": 1 })
            .options(
                IndexOptions::builder()
                    .name("receipt_number_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let reference_index = IndexModel::builder()
            .keys(doc! { "payment_method.reference": 1 })
            .options(
                IndexOptions::builder()
                    .name("gateway_reference_idx".to_string())
                    .build(),
            )
            .build();

        let order_number_index = IndexModel::builder()
            .keys(doc! { "payment_method.order_number": 1 })
            .options(
                IndexOptions::builder()
                    .name("gateway_order_number_idx".to_string())
                    .build(),
            )
            .build();

        let lease_status_index = IndexModel::builder()
            .keys(doc! { "lease_id": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("lease_status_idx".to_string())
                    .build(),
            )
            .build();

        self.transactions
            .create_indexes(
                [
                    receipt_index,
                    reference_index,
                    order_number_index,
                    lease_status_index,
                ],
                None,
            )
            .await?;

        let history_reference_index = IndexModel::builder()
            .keys(doc! { "payment_history.reference": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_history_reference_idx".to_string())
                    .build(),
            )
            .build();

        self.leases
            .create_indexes([history_reference_index], None)
            .await?;

        tracing::info!("Ledger store indexes initialized");
        Ok(())
    }

    async fn find_one_as<T: DeserializeOwned>(
        collection: &Collection<Document>,
        filter: Document,
    ) -> StoreResult<Option<T>> {
        match collection.find_one(filter, None).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    async fn insert_as<T: Serialize>(
        collection: &Collection<Document>,
        value: &T,
    ) -> StoreResult<()> {
        let document = to_document(value)?;
        collection
            .insert_one(document, None)
            .await
            .map_err(map_insert_error)?;
        Ok(())
    }
}

fn to_bson<T: Serialize>(value: &T) -> StoreResult<Bson> {
    let json = serde_json::to_value(value)?;
    Bson::try_from(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(StoreError::Serialization(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

fn from_document<T: DeserializeOwned>(document: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(
        Bson::Document(document).into_relaxed_extjson(),
    )?)
}

fn id_filter(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

fn map_insert_error(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == DUPLICATE_KEY_CODE {
            return StoreError::DuplicateKey(write_error.message.clone());
        }
    }
    StoreError::Database(err)
}

fn now_bson() -> StoreResult<Bson> {
    to_bson(&Utc::now())
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn insert_lease(&self, lease: &Lease) -> StoreResult<()> {
        Self::insert_as(&self.leases, lease).await
    }

    async fn get_lease(&self, id: Uuid) -> StoreResult<Option<Lease>> {
        Self::find_one_as(&self.leases, id_filter(id)).await
    }

    async fn list_lease_ids(&self) -> StoreResult<Vec<Uuid>> {
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": 1 })
            .build();
        let mut cursor = self.leases.find(doc! {}, options).await?;
        let mut ids = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            let raw = document
                .get_str("_id")
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let id = Uuid::parse_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn append_payment_entry(
        &self,
        lease_id: Uuid,
        entry: &PaymentEntry,
    ) -> StoreResult<bool> {
        // The reference guard and the push are one atomic document update.
        let filter = doc! {
            "_id": lease_id.to_string(),
            "payment_history.reference": { "$ne": entry.reference.as_str() },
        };
        let update = doc! {
            "$push": { "payment_history": to_bson(entry)? },
            "$set": { "updated_at": now_bson()? },
        };
        let result = self.leases.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn replace_payment_history(
        &self,
        snapshot: &Lease,
        entries: &[PaymentEntry],
    ) -> StoreResult<bool> {
        // Every append bumps `updated_at` and grows the array, so either
        // guard catches a write that landed after the snapshot.
        let expected_len = snapshot.payment_history.len() as i64;
        let filter = doc! {
            "_id": snapshot.id.to_string(),
            "updated_at": to_bson(&snapshot.updated_at)?,
            "payment_history": { "$size": expected_len },
        };
        let update = doc! {
            "$set": {
                "payment_history": to_bson(&entries)?,
                "updated_at": now_bson()?,
            }
        };
        let result = self.leases.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
        Self::insert_as(&self.transactions, transaction).await
    }

    async fn get_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        Self::find_one_as(&self.transactions, id_filter(id)).await
    }

    async fn find_transaction_by_receipt(
        &self,
        receipt_number: &str,
    ) -> StoreResult<Option<Transaction>> {
        Self::find_one_as(
            &self.transactions,
            doc! { "metadata.receipt_number": receipt_number },
        )
        .await
    }

    async fn find_transaction_by_gateway_key(
        &self,
        key: &str,
    ) -> StoreResult<Option<Transaction>> {
        let filter = doc! {
            "$or": [
                { "payment_method.reference": key },
                { "payment_method.order_number": key },
            ]
        };
        Self::find_one_as(&self.transactions, filter).await
    }

    async fn list_transactions_for_lease(
        &self,
        lease_id: Uuid,
        status: Option<TransactionStatus>,
    ) -> StoreResult<Vec<Transaction>> {
        let mut filter = doc! { "lease_id": lease_id.to_string() };
        if let Some(status) = status {
            filter.insert("status", status.as_str());
        }
        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();
        let mut cursor = self.transactions.find(filter, options).await?;
        let mut transactions = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            transactions.push(from_document(document)?);
        }
        Ok(transactions)
    }

    async fn record_gateway_response(
        &self,
        id: Uuid,
        update: &GatewayUpdate,
    ) -> StoreResult<bool> {
        let mut identifiers = doc! { "updated_at": now_bson()? };
        if let Some(reference) = &update.reference {
            identifiers.insert("payment_method.reference", reference.as_str());
        }
        if let Some(order_number) = &update.order_number {
            identifiers.insert("payment_method.order_number", order_number.as_str());
        }
        let found = self
            .transactions
            .update_one(id_filter(id), doc! { "$set": identifiers }, None)
            .await?
            .matched_count
            == 1;

        let mut details = Document::new();
        if let Some(response) = &update.provider_response {
            details.insert("payment_method.provider_response", to_bson(response)?);
        }
        if let Some(error) = &update.provider_error {
            details.insert("metadata.provider_error", error.as_str());
        }
        if found && !details.is_empty() {
            // A settled transaction keeps the response that settled it.
            let filter = doc! {
                "_id": id.to_string(),
                "status": TransactionStatus::Pending.as_str(),
            };
            self.transactions
                .update_one(filter, doc! { "$set": details }, None)
                .await?;
        }
        Ok(found)
    }

    async fn transition_if_pending(
        &self,
        id: Uuid,
        settlement: &Settlement,
    ) -> StoreResult<Option<Transaction>> {
        let at = to_bson(&settlement.at)?;
        let mut set = doc! {
            "status": settlement.status.as_str(),
            "payment_method.status": to_bson(&settlement.method_status)?,
            "payment_method.provider_response": to_bson(&settlement.provider_response)?,
            "updated_at": at.clone(),
        };
        if settlement.status == TransactionStatus::Complete {
            set.insert("completed_at", at);
        }

        // Only one concurrent caller can match the pending filter.
        let filter = doc! {
            "_id": id.to_string(),
            "status": TransactionStatus::Pending.as_str(),
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        match self
            .transactions
            .find_one_and_update(filter, doc! { "$set": set }, options)
            .await?
        {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    async fn insert_utility_bill(&self, bill: &UtilityBill) -> StoreResult<()> {
        Self::insert_as(&self.bills, bill).await
    }

    async fn get_utility_bill(&self, id: Uuid) -> StoreResult<Option<UtilityBill>> {
        Self::find_one_as(&self.bills, id_filter(id)).await
    }

    async fn settle_bill_share(
        &self,
        bill_id: Uuid,
        apartment_id: Uuid,
        transaction_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let at = to_bson(&at)?;
        let filter = doc! {
            "_id": bill_id.to_string(),
            "distribution": {
                "$elemMatch": {
                    "apartment_id": apartment_id.to_string(),
                    "status": to_bson(&ShareStatus::Unpaid)?,
                }
            },
        };
        let update = doc! {
            "$set": {
                "distribution.$.status": to_bson(&ShareStatus::Paid)?,
                "distribution.$.transaction_id": transaction_id.to_string(),
                "distribution.$.paid_at": at.clone(),
                "updated_at": at,
            }
        };
        let result = self.bills.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn mark_bill_paid_if_settled(&self, bill_id: Uuid) -> StoreResult<Option<BillStatus>> {
        let unpaid = to_bson(&ShareStatus::Unpaid)?;
        let paid = to_bson(&ShareStatus::Paid)?;

        // Fully settled: no unpaid share left.
        let settle_filter = doc! {
            "_id": bill_id.to_string(),
            "status": { "$ne": to_bson(&BillStatus::Paid)? },
            "distribution.0": { "$exists": true },
            "distribution": { "$not": { "$elemMatch": { "status": unpaid.clone() } } },
        };
        self.bills
            .update_one(
                settle_filter,
                doc! { "$set": { "status": to_bson(&BillStatus::Paid)?, "updated_at": now_bson()? } },
                None,
            )
            .await?;

        // Partially settled: only ever promoted from unpaid.
        let partial_filter = doc! {
            "_id": bill_id.to_string(),
            "status": to_bson(&BillStatus::Unpaid)?,
            "distribution": { "$elemMatch": { "status": paid } },
        };
        self.bills
            .update_one(
                partial_filter,
                doc! { "$set": { "status": to_bson(&BillStatus::Partial)?, "updated_at": now_bson()? } },
                None,
            )
            .await?;

        let bill: Option<UtilityBill> = Self::find_one_as(&self.bills, id_filter(bill_id)).await?;
        Ok(bill.map(|bill| bill.status))
    }

    async fn insert_apartment(&self, apartment: &ApartmentPaymentStatus) -> StoreResult<()> {
        Self::insert_as(&self.apartments, apartment).await
    }

    async fn get_apartment(&self, id: Uuid) -> StoreResult<Option<ApartmentPaymentStatus>> {
        Self::find_one_as(&self.apartments, id_filter(id)).await
    }

    async fn record_rent_payment(
        &self,
        apartment_id: Uuid,
        paid_at: DateTime<Utc>,
        next_due: NaiveDate,
    ) -> StoreResult<bool> {
        let Some(current) = self.get_apartment(apartment_id).await? else {
            return Ok(false);
        };
        if current.last_payment_date.map_or(false, |last| paid_at < last) {
            return Ok(true);
        }

        let filter = match current.last_payment_date {
            Some(last) => doc! { "_id": apartment_id.to_string(), "last_payment_date": to_bson(&last)? },
            None => doc! { "_id": apartment_id.to_string(), "last_payment_date": Bson::Null },
        };
        let update = doc! {
            "$set": {
                "last_payment_date": to_bson(&paid_at)?,
                "next_payment_due": to_bson(&next_due)?,
                "updated_at": now_bson()?,
            }
        };
        // A concurrent newer payment wins; losing the race is not an error.
        self.apartments.update_one(filter, update, None).await?;
        Ok(true)
    }
}
