//! HMAC helpers shared by the per-platform signature verifiers.
//!
//! Digest comparison goes through `Mac::verify_slice`, and plain token
//! comparison through `subtle`, so neither short-circuits on the first
//! differing byte.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Constant-time string equality for verify tokens and similar secrets.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Handshake token check. An unset (empty) expected token never matches.
pub fn verify_token_matches(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && constant_time_eq(provided, expected)
}

// An empty key would let anyone sign, so no MAC is produced for it.
fn sha256_mac(secret: &str, parts: &[&[u8]]) -> Option<HmacSha256> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

fn sha1_mac(secret: &str, parts: &[&[u8]]) -> Option<HmacSha1> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

/// HMAC-SHA256 over the concatenation of `parts`, hex encoded.
pub fn hmac_sha256_hex(secret: &str, parts: &[&[u8]]) -> Option<String> {
    sha256_mac(secret, parts).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// HMAC-SHA256 over the concatenation of `parts`, base64 encoded.
pub fn hmac_sha256_base64(secret: &str, parts: &[&[u8]]) -> Option<String> {
    sha256_mac(secret, parts).map(|mac| BASE64.encode(mac.finalize().into_bytes()))
}

/// HMAC-SHA1 over `body`, hex encoded.
pub fn hmac_sha1_hex(secret: &str, body: &[u8]) -> Option<String> {
    sha1_mac(secret, &[body]).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_sha256_hex(secret: &str, parts: &[&[u8]], provided_hex: &str) -> bool {
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    match sha256_mac(secret, parts) {
        Some(mac) => mac.verify_slice(&provided).is_ok(),
        None => false,
    }
}

pub fn verify_sha256_base64(secret: &str, parts: &[&[u8]], provided_b64: &str) -> bool {
    let Ok(provided) = BASE64.decode(provided_b64.trim()) else {
        return false;
    };
    match sha256_mac(secret, parts) {
        Some(mac) => mac.verify_slice(&provided).is_ok(),
        None => false,
    }
}

pub fn verify_sha1_hex(secret: &str, body: &[u8], provided_hex: &str) -> bool {
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    match sha1_mac(secret, &[body]) {
        Some(mac) => mac.verify_slice(&provided).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_round_trip() {
        let sig = hmac_sha256_hex("secret", &[b"payload"]).unwrap();
        assert!(verify_sha256_hex("secret", &[b"payload"], &sig));
        assert!(!verify_sha256_hex("secret", &[b"payloaD"], &sig));
        assert!(!verify_sha256_hex("other", &[b"payload"], &sig));
    }

    #[test]
    fn concatenated_parts_match_single_buffer() {
        let split = hmac_sha256_hex("k", &[b"body", b"1700000000"]).unwrap();
        let joined = hmac_sha256_hex("k", &[b"body1700000000"]).unwrap();
        assert_eq!(split, joined);
    }

    #[test]
    fn known_sha256_vector() {
        // RFC 4231 test case 2
        let sig = hmac_sha256_hex("Jefe", &[b"what do ya want for nothing?"]).unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn invalid_encodings_are_rejected() {
        assert!(!verify_sha256_hex("k", &[b"x"], "not-hex!!"));
        assert!(!verify_sha256_base64("k", &[b"x"], "%%%"));
        assert!(!verify_sha1_hex("k", b"x", ""));
    }

    #[test]
    fn sha1_and_base64_verify() {
        let sha1 = hmac_sha1_hex("hub", b"<feed/>").unwrap();
        assert_eq!(sha1.len(), 40);
        assert!(verify_sha1_hex("hub", b"<feed/>", &sha1));

        let b64 = hmac_sha256_base64("consumer", &[b"{}"]).unwrap();
        assert!(verify_sha256_base64("consumer", &[b"{}"], &b64));
    }

    #[test]
    fn empty_secret_never_verifies() {
        // Digest of `{}` under a zero-length key, as a forger would compute it.
        let forged = {
            let mut mac = HmacSha256::new_from_slice(b"").unwrap();
            mac.update(b"{}");
            hex::encode(mac.finalize().into_bytes())
        };
        assert!(!verify_sha256_hex("", &[b"{}"], &forged));
        assert!(hmac_sha256_hex("", &[b"{}"]).is_none());
        assert!(hmac_sha256_base64("", &[b"{}"]).is_none());
        assert!(hmac_sha1_hex("", b"{}").is_none());
        assert!(!verify_sha1_hex("", b"{}", "00"));
    }

    #[test]
    fn empty_verify_token_never_matches() {
        assert!(verify_token_matches("verify-me", "verify-me"));
        assert!(!verify_token_matches("", ""));
        assert!(!verify_token_matches("verify-me", ""));
    }

    #[test]
    fn constant_time_eq_compares_content() {
        assert!(constant_time_eq("token", "token"));
        assert!(!constant_time_eq("token", "tokem"));
        assert!(!constant_time_eq("token", "token-longer"));
    }
}
