use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, PaymentMethodType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Active,
    Ended,
    Terminated,
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseStatus::Active => write!(f, "active"),
            LeaseStatus::Ended => write!(f, "ended"),
            LeaseStatus::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Paid,
    Partial,
    Late,
    Unpaid,
    Pending,
}

/// Where a payment entry came from. Used by `dedupe` to decide which copy
/// of a duplicated reference to keep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Gateway,
    #[default]
    Manual,
    Backfill,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Gateway => "gateway",
            EntrySource::Manual => "manual",
            EntrySource::Backfill => "backfill",
        }
    }
}

/// One line of a lease's payment history.
///
/// `reference` is the idempotency key: it equals the receipt number of the
/// backing transaction, or the caller-supplied reference for manual entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentEntry {
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub method: PaymentMethodType,
    pub status: EntryStatus,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
}

/// A rent book: one tenancy of one apartment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub apartment_id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub tenant_phone: Option<String>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub monthly_rent: Decimal,
    pub security_deposit: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub payment_history: Vec<PaymentEntry>,
    pub status: LeaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_active(&self) -> bool {
        self.status == LeaseStatus::Active
    }

    /// Owner and tenant are the only parties allowed to see or record payments.
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.tenant_id == user_id
    }

    pub fn has_reference(&self, reference: &str) -> bool {
        self.payment_history
            .iter()
            .any(|entry| entry.reference == reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn lease() -> Lease {
        let now = Utc::now();
        Lease {
            id: Uuid::new_v4(),
            apartment_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            tenant_phone: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            monthly_rent: Decimal::from(500),
            security_deposit: Decimal::from(1000),
            currency: Currency::Usd,
            payment_history: Vec::new(),
            status: LeaseStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn parties_are_owner_and_tenant() {
        let lease = lease();
        assert!(lease.is_party(lease.owner_id));
        assert!(lease.is_party(lease.tenant_id));
        assert!(!lease.is_party(Uuid::new_v4()));
    }

    #[test]
    fn legacy_entries_without_source_deserialize_as_manual() {
        let json = serde_json::json!({
            "date": "2024-02-01T10:00:00Z",
            "amount": "500",
            "method": "cash",
            "status": "paid",
            "reference": "REC-20240201-0001"
        });
        let entry: PaymentEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.source, EntrySource::Manual);
        assert!(entry.transaction_id.is_none());
    }
}
