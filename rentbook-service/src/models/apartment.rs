use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rent bookkeeping kept on the apartment record.
///
/// Apartments are owned by the property CRUD surface; this service only
/// touches the payment dates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApartmentPaymentStatus {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub next_payment_due: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl ApartmentPaymentStatus {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            last_payment_date: None,
            next_payment_due: None,
            updated_at: Utc::now(),
        }
    }
}
