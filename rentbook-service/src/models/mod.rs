//! Persisted documents of the rent book ledger.

mod apartment;
mod lease;
mod transaction;
mod utility_bill;

pub use apartment::ApartmentPaymentStatus;
pub use lease::{EntrySource, EntryStatus, Lease, LeaseStatus, PaymentEntry};
pub use transaction::{
    Currency, Money, PaymentMethodDetails, PaymentMethodStatus, PaymentMethodType, Transaction,
    TransactionMetadata, TransactionStatus, TransactionType,
};
pub use utility_bill::{BillShare, BillStatus, ShareStatus, UtilityBill};
