use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cdf,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Cdf => "CDF",
            Currency::Usd => "USD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub value: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[default]
    Rent,
    Deposit,
    ServiceFee,
    Other,
    Utility,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Rent => "rent",
            TransactionType::Deposit => "deposit",
            TransactionType::ServiceFee => "service_fee",
            TransactionType::Other => "other",
            TransactionType::Utility => "utility",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    MobileMoney,
    Card,
    Cash,
    Transfer,
}

impl PaymentMethodType {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethodType::MobileMoney => "Mobile money",
            PaymentMethodType::Card => "Card",
            PaymentMethodType::Cash => "Cash",
            PaymentMethodType::Transfer => "Bank transfer",
        }
    }
}

/// Gateway-facing sub-status of the payment method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Complete,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Complete => "complete",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    /// Terminal transactions are never re-opened.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentMethodDetails {
    #[serde(rename = "type")]
    pub method_type: PaymentMethodType,
    pub provider: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Reference sent to (or echoed back by) the gateway.
    #[serde(default)]
    pub reference: Option<String>,
    /// Gateway order identifier used by the check endpoint.
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub provider_response: Option<serde_json::Value>,
    pub status: PaymentMethodStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionMetadata {
    /// Globally unique; the idempotency key mirrored into payment entries.
    pub receipt_number: String,
    #[serde(default)]
    pub utility_bill_id: Option<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider_error: Option<String>,
}

/// System of record for one payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub lease_id: Option<Uuid>,
    pub apartment_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub payment_method: PaymentMethodDetails,
    pub status: TransactionStatus,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn receipt_number(&self) -> &str {
        &self.metadata.receipt_number
    }

    /// True when `key` is the gateway reference or order number of this
    /// transaction.
    pub fn matches_gateway_key(&self, key: &str) -> bool {
        self.payment_method.reference.as_deref() == Some(key)
            || self.payment_method.order_number.as_deref() == Some(key)
    }
}
