//! Webhook signature verification.
//!
//! `Cko-Signature` carries hex(HMAC-SHA256(webhook_secret, raw_body)).
//! Comparison is constant-time over the decoded MAC bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the expected signature for a payload.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a presented signature against the payload.
pub fn verify(secret: &str, body: &[u8], presented: &str) -> bool {
    let Ok(presented_bytes) = hex::decode(presented) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    expected.as_slice().ct_eq(presented_bytes.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_verifies() {
        let body = br#"{"event_id":"evt_1","type":"payment_captured"}"#;
        let sig = sign("whsec_test", body);
        assert!(verify("whsec_test", body, &sig));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign("whsec_test", b"original");
        assert!(!verify("whsec_test", b"tampered", &sig));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign("whsec_a", b"payload");
        assert!(!verify("whsec_b", b"payload", &sig));
    }

    #[test]
    fn test_malformed_hex_rejected() {
        assert!(!verify("whsec_test", b"payload", "not-hex"));
    }
}
