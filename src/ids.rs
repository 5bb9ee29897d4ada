#![forbid(unsafe_code)]

//! Document identifiers: 24 lowercase hex characters, a 4-byte big-endian
//! creation timestamp followed by 8 random bytes.

use chrono::Utc;
use rand_core::{OsRng, RngCore};

pub const ID_LEN: usize = 24;

pub fn new_id() -> String {
    let mut bytes = [0u8; 12];
    let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
    bytes[..4].copy_from_slice(&seconds.to_be_bytes());
    OsRng.fill_bytes(&mut bytes[4..]);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Canonical string form used for every identifier comparison.
pub fn canonical_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn is_valid_id(raw: &str) -> bool {
    let raw = raw.trim();
    raw.len() == ID_LEN && raw.bytes().all(|byte| byte.is_ascii_hexdigit())
}

/// Validates and canonicalizes a caller supplied identifier.
pub fn parse_id(raw: &str) -> Option<String> {
    is_valid_id(raw).then(|| canonical_id(raw))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_valid_and_unique() {
        let ids: HashSet<String> = (0..256).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 256);
        assert!(ids.iter().all(|id| is_valid_id(id)));
        assert!(ids.iter().all(|id| id == &canonical_id(id)));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("abc"));
        assert!(!is_valid_id("zzzzzzzzzzzzzzzzzzzzzzzz"));
        assert!(!is_valid_id("0123456789abcdef012345678"));
    }

    #[test]
    fn parse_id_canonicalizes_case_and_whitespace() {
        assert_eq!(
            parse_id(" 0123456789ABCDEF01234567 ").as_deref(),
            Some("0123456789abcdef01234567")
        );
        assert_eq!(parse_id("nope"), None);
    }
}
