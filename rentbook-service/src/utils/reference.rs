use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Longest reference the provider accepts.
pub const GATEWAY_REFERENCE_MAX_LEN: usize = 49;

/// Prefix of transaction receipt numbers. Manual entries may not use it.
pub const RECEIPT_PREFIX: &str = "REC-";

/// Prefix of references generated for manual entries.
pub const MANUAL_PREFIX: &str = "MAN-";

fn dated_number(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}{}-{:04}", prefix, at.format("%Y%m%d"), suffix)
}

/// `REC-YYYYMMDD-NNNN`. Uniqueness is enforced by the store; callers retry
/// on collision.
pub fn receipt_number(at: DateTime<Utc>) -> String {
    dated_number(RECEIPT_PREFIX, at)
}

/// `MAN-YYYYMMDD-NNNN`, unique within a lease history only.
pub fn manual_reference(at: DateTime<Utc>) -> String {
    dated_number(MANUAL_PREFIX, at)
}

/// Whether a caller-supplied reference falls in the transaction receipt
/// namespace.
pub fn is_receipt_reference(reference: &str) -> bool {
    reference
        .get(..RECEIPT_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(RECEIPT_PREFIX))
}

fn short_hash(id: Uuid) -> String {
    let digest = Sha256::digest(id.to_string().as_bytes());
    hex::encode(&digest[..4])
}

/// `RB-<tx hash>-<lease hash>-<yyMMddHHmmss>`, capped at the provider limit.
pub fn gateway_reference(transaction_id: Uuid, lease_id: Uuid, at: DateTime<Utc>) -> String {
    let mut reference = format!(
        "RB-{}-{}-{}",
        short_hash(transaction_id),
        short_hash(lease_id),
        at.format("%y%m%d%H%M%S")
    );
    reference.truncate(GATEWAY_REFERENCE_MAX_LEN);
    reference
}
