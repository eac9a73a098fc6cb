//! Phone numbers are stored in one canonical form, `+<country><subscriber>`.
//! Every inbound number is normalized here before it is persisted or
//! compared.

use thiserror::Error;

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number contains invalid characters: {0}")]
    InvalidCharacters(String),

    #[error("Phone number has an invalid length: {0}")]
    InvalidLength(String),
}

/// Normalize to `+E.164`. Local numbers (leading `0` or no country code)
/// get `default_country_code`; `00` international prefixes become `+`.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let international = trimmed.starts_with('+');
    let mut digits = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if i == 0 => {}
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(PhoneError::InvalidCharacters(raw.to_string())),
        }
    }
    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }

    let canonical = if international {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("{}{}", default_country_code, rest)
    } else if digits.starts_with(default_country_code) && digits.len() >= MIN_DIGITS + 1 {
        digits
    } else {
        format!("{}{}", default_country_code, digits)
    };

    if !(MIN_DIGITS..=MAX_DIGITS).contains(&canonical.len()) {
        return Err(PhoneError::InvalidLength(raw.to_string()));
    }
    Ok(format!("+{}", canonical))
}

/// The gateway takes the digits of the canonical form without `+`.
pub fn gateway_digits(canonical: &str) -> String {
    canonical.trim_start_matches('+').to_string()
}
