//! Recipient address validators.

use lettre::Address;

const PHONE_SEPARATORS: &[char] = &['-', '.', ' ', '(', ')'];
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;
const MIN_DEVICE_TOKEN_LEN: usize = 16;

/// Accepts an optional leading `+`, digits, and `- . ( )` or spaces as
/// separators, with 7 to 15 digits in total.
pub fn is_valid_phone(input: &str) -> bool {
    let body = input.strip_prefix('+').unwrap_or(input);
    let mut digits = 0;
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits += 1;
        } else if !PHONE_SEPARATORS.contains(&c) {
            return false;
        }
    }
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
}

/// Accepts alphanumeric characters, `-` and `_`, at least 16 long.
pub fn is_valid_device_token(input: &str) -> bool {
    input.len() >= MIN_DEVICE_TOKEN_LEN
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn is_valid_email(input: &str) -> bool {
    input.parse::<Address>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_accepts_common_forms() {
        for ok in [
            "+14155552671",
            "415-555-2671",
            "(415) 555.2671",
            "+44 20 7946 0958",
            "5552671",
        ] {
            assert!(is_valid_phone(ok), "{ok} should be valid");
        }
    }

    #[test]
    fn phone_rejects_bad_input() {
        for bad in [
            "",
            "+",
            "555-267",          // 6 digits
            "1234567890123456", // 16 digits
            "415-555-CALL",
            "++14155552671",
            "415/555/2671",
            "+1 415 555 2671 ext 9",
        ] {
            assert!(!is_valid_phone(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn device_token_rules() {
        assert!(is_valid_device_token("a1b2c3d4e5f6g7h8"));
        assert!(is_valid_device_token("fcm_token-0123456789abcdef"));
        assert!(!is_valid_device_token(""));
        assert!(!is_valid_device_token("short-token"));
        assert!(!is_valid_device_token("has space 0123456789"));
        assert!(!is_valid_device_token("bad!chars0123456789"));
    }

    #[test]
    fn email_uses_address_parser() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two@@example.com"));
    }
}
