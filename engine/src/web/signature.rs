//! Provider webhook signature verification.
//!
//! Providers that sign their callbacks send three values: a Unix
//! timestamp, a random token and an HMAC-SHA256 hex digest of
//! timestamp + token computed with a shared signing key.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Verify a signed webhook request.
///
/// Returns `true` only when the signature matches and the timestamp is
/// within `max_age_seconds` of the current time (replay protection).
pub fn verify_webhook_signature(
    signing_key: &str,
    timestamp: &str,
    token: &str,
    signature: &str,
    max_age_seconds: u64,
) -> bool {
    if signing_key.is_empty() || timestamp.is_empty() || token.is_empty() || signature.is_empty() {
        warn!(
            has_timestamp = !timestamp.is_empty(),
            has_token = !token.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let webhook_time: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "webhook_signature_invalid_timestamp");
            return false;
        }
    };

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let age = current_time.abs_diff(webhook_time);
    if age > max_age_seconds {
        warn!(
            webhook_time = webhook_time,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "webhook_signature_stale"
        );
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(signing_key.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };
    mac.update(format!("{}{}", timestamp, token).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let valid = constant_time_compare(&expected, signature);
    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "webhook_signature_mismatch"
        );
    }
    valid
}

/// Constant-time string comparison to prevent timing attacks.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Whether signature verification is enabled at all.
pub fn is_signature_verification_enabled(signing_key: &Option<String>) -> bool {
    signing_key
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(key: &str, timestamp: &str, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}{}", timestamp, token).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn now() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string()
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(!verify_webhook_signature("", "123", "token", "sig", 300));
        assert!(!verify_webhook_signature("key", "", "token", "sig", 300));
        assert!(!verify_webhook_signature("key", "123", "", "sig", 300));
        assert!(!verify_webhook_signature("key", "123", "token", "", 300));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let timestamp = "946684800"; // year 2000
        let signature = sign("key", timestamp, "token");
        assert!(!verify_webhook_signature(
            "key", timestamp, "token", &signature, 300
        ));
    }

    #[test]
    fn test_valid_signature_accepted() {
        let timestamp = now();
        let signature = sign("key", &timestamp, "token");
        assert!(verify_webhook_signature(
            "key", &timestamp, "token", &signature, 300
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let timestamp = now();
        let signature = sign("other-key", &timestamp, "token");
        assert!(!verify_webhook_signature(
            "key", &timestamp, "token", &signature, 300
        ));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_verification_enabled() {
        assert!(!is_signature_verification_enabled(&None));
        assert!(!is_signature_verification_enabled(&Some("  ".to_string())));
        assert!(is_signature_verification_enabled(&Some("k".to_string())));
    }
}
