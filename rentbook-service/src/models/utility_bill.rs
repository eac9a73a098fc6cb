use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Unpaid,
    Partial,
    Paid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Unpaid,
    Paid,
}

/// One apartment's portion of a split utility bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillShare {
    pub apartment_id: Uuid,
    pub amount: Decimal,
    pub status: ShareStatus,
    #[serde(default)]
    pub transaction_id: Option<Uuid>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilityBill {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub landlord_id: Uuid,
    pub description: String,
    pub total: Money,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub status: BillStatus,
    pub distribution: Vec<BillShare>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UtilityBill {
    pub fn share_for(&self, apartment_id: Uuid) -> Option<&BillShare> {
        self.distribution
            .iter()
            .find(|share| share.apartment_id == apartment_id)
    }

    /// Status implied by the distribution shares.
    pub fn settled_status(&self) -> BillStatus {
        let paid = self
            .distribution
            .iter()
            .filter(|share| share.status == ShareStatus::Paid)
            .count();
        if !self.distribution.is_empty() && paid == self.distribution.len() {
            BillStatus::Paid
        } else if paid > 0 {
            BillStatus::Partial
        } else {
            BillStatus::Unpaid
        }
    }
}
