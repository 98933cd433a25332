//! Contact-field helpers for Mongolian mobile numbers and free-text
//! delivery addresses.

/// Sentinel stored when no usable phone number was extracted.
pub const PHONE_UNKNOWN: &str = "unknown";

/// Sentinel stored when no usable address was extracted.
pub const ADDRESS_UNKNOWN: &str = "address unknown";

const COUNTRY_PREFIX: &str = "976";

fn digits_of(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn is_canonical(digits: &str) -> bool {
    digits.len() == 8
        && digits.as_bytes().first().is_some_and(|b| matches!(b, b'6'..=b'9'))
}

/// A Mongolian mobile number is exactly 8 digits and starts with 6, 7, 8
/// or 9. Formatting characters are ignored; a leading +976/976 country
/// prefix is stripped before the check.
pub fn validate_phone(raw: &str) -> bool {
    normalize_phone(raw).is_some()
}

/// Canonical 8-digit form of `raw`, or `None` when it is not a valid
/// Mongolian mobile number under the same rule `validate_phone` applies.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits = digits_of(raw);
    if digits.len() == 8 + COUNTRY_PREFIX.len() && digits.starts_with(COUNTRY_PREFIX) {
        digits = digits.split_off(COUNTRY_PREFIX.len());
    }

    is_canonical(&digits).then_some(digits)
}

/// `phone` column value for an order: canonical number or the sentinel.
pub fn phone_or_unknown(raw: Option<&str>) -> String {
    raw.and_then(normalize_phone).unwrap_or_else(|| PHONE_UNKNOWN.to_string())
}

/// Trims and collapses runs of whitespace. Anything else in the text is
/// kept as the customer wrote it.
pub fn canonical_address(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// `address` column value for an order: canonical text or the sentinel.
pub fn address_or_unknown(raw: Option<&str>) -> String {
    raw.and_then(canonical_address).unwrap_or_else(|| ADDRESS_UNKNOWN.to_string())
}
