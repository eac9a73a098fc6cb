pub mod phone;
pub mod reference;

pub use phone::{gateway_digits, normalize_phone, PhoneError};
pub use reference::{
    gateway_reference, is_receipt_reference, manual_reference, receipt_number,
    GATEWAY_REFERENCE_MAX_LEN,
};
