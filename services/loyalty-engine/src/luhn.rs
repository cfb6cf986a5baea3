//! Order number validation.
//!
//! Order numbers are decimal digit strings protected by a Luhn checksum.
//! Withdrawal references only need to look like an order number.

/// Returns `true` when `number` is at least two decimal digits long and
/// passes the Luhn checksum.
pub fn check_luhn(number: &str) -> bool {
    if number.len() < 2 {
        return false;
    }

    let mut sum = 0u32;
    for (position, byte) in number.bytes().rev().enumerate() {
        if !byte.is_ascii_digit() {
            return false;
        }

        let mut digit = u32::from(byte - b'0');
        if position % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

/// Shape check for withdrawal references: a non-empty string of digits.
pub fn is_order_shaped(reference: &str) -> bool {
    !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_digit())
}
