//! Pure derivation of payment entries from transactions.
//!
//! A lease's payment history is a view over its complete transactions keyed
//! by receipt number. The reconciliation engine and the repair tools both
//! build entries here so a replayed or backfilled entry is identical to the
//! one written live.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::models::{
    EntrySource, EntryStatus, Lease, PaymentEntry, Transaction, TransactionStatus,
};

pub fn derive_entry_status(amount: Decimal, monthly_rent: Decimal) -> EntryStatus {
    if amount >= monthly_rent {
        EntryStatus::Paid
    } else {
        EntryStatus::Partial
    }
}

/// Human-readable provenance stored in the entry comment.
pub fn provenance(transaction: &Transaction) -> String {
    format!(
        "{} {} payment via {} (transaction {})",
        transaction.payment_method.method_type.label(),
        transaction.transaction_type.as_str(),
        transaction.payment_method.provider,
        transaction.id
    )
}

/// Build the payment entry a complete transaction contributes to `lease`.
///
/// Returns `None` for transactions that are not complete or that belong to
/// another lease.
pub fn entry_from_transaction(
    transaction: &Transaction,
    lease: &Lease,
    source: EntrySource,
) -> Option<PaymentEntry> {
    if transaction.status != TransactionStatus::Complete {
        return None;
    }
    if transaction.lease_id != Some(lease.id) {
        return None;
    }

    let amount = transaction.amount.value;
    Some(PaymentEntry {
        date: completion_time(transaction),
        amount,
        method: transaction.payment_method.method_type,
        status: derive_entry_status(amount, lease.monthly_rent),
        reference: transaction.receipt_number().to_string(),
        comment: Some(provenance(transaction)),
        source,
        transaction_id: Some(transaction.id),
    })
}

/// Completion time of a settled transaction; legacy records without one fall
/// back to their last update.
pub fn completion_time(transaction: &Transaction) -> DateTime<Utc> {
    transaction.completed_at.unwrap_or(transaction.updated_at)
}

/// Rent falls due one calendar month after the last payment.
pub fn next_payment_due(paid_at: DateTime<Utc>) -> NaiveDate {
    let paid_on = paid_at.date_naive();
    paid_on.checked_add_months(Months::new(1)).unwrap_or(paid_on)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        Currency, LeaseStatus, Money, PaymentMethodDetails, PaymentMethodStatus,
        PaymentMethodType, TransactionMetadata, TransactionType,
    };
    use chrono::TimeZone;
    use uuid::Uuid;

    pub(crate) fn lease(monthly_rent: i64) -> Lease {
        let now = Utc::now();
        Lease {
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
        }
    }

    pub(crate) fn transaction(lease: &Lease, amount: i64, status: TransactionStatus) -> Transaction {
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
                provider: "mobile-money".to_string(),
                phone: lease.tenant_phone.clone(),
                reference: None,
                order_number: None,
                provider_response: None,
                status: PaymentMethodStatus::Pending,
            },
            status,
            metadata: TransactionMetadata {
                receipt_number: format!("REC-20240201-{:04}", rand::random::<u16>() % 10000),
                utility_bill_id: None,
                description: None,
                provider_error: None,
            },
            created_at: now,
            updated_at: now,
            completed_at: (status == TransactionStatus::Complete).then_some(now),
        }
    }

    #[test]
    fn full_rent_is_paid_and_less_is_partial() {
        let rent = Decimal::from(500);
        assert_eq!(derive_entry_status(Decimal::from(500), rent), EntryStatus::Paid);
        assert_eq!(derive_entry_status(Decimal::from(650), rent), EntryStatus::Paid);
        assert_eq!(
            derive_entry_status(Decimal::new(49999, 2), rent),
            EntryStatus::Partial
        );
    }

    #[test]
    fn entry_mirrors_complete_transaction() {
        let lease = lease(500);
        let tx = transaction(&lease, 300, TransactionStatus::Complete);

        let entry = entry_from_transaction(&tx, &lease, EntrySource::Gateway).unwrap();
        assert_eq!(entry.reference, tx.metadata.receipt_number);
        assert_eq!(entry.amount, Decimal::from(300));
        assert_eq!(entry.status, EntryStatus::Partial);
        assert_eq!(entry.date, tx.completed_at.unwrap());
        assert_eq!(entry.transaction_id, Some(tx.id));
        assert_eq!(entry.source, EntrySource::Gateway);
        assert!(entry.comment.unwrap().contains("Mobile money rent payment"));
    }

    #[test]
    fn non_complete_transactions_contribute_nothing() {
        let lease = lease(500);
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Failed,
            TransactionStatus::Refunded,
        ] {
            let tx = transaction(&lease, 500, status);
            assert!(entry_from_transaction(&tx, &lease, EntrySource::Gateway).is_none());
        }
    }

    #[test]
    fn transactions_of_another_lease_are_ignored() {
        let lease = lease(500);
        let other = self::lease(500);
        let tx = transaction(&other, 500, TransactionStatus::Complete);
        assert!(entry_from_transaction(&tx, &lease, EntrySource::Backfill).is_none());
    }

    #[test]
    fn next_due_is_one_month_later_clamped_to_month_end() {
        let paid = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
        assert_eq!(
            next_payment_due(paid),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
