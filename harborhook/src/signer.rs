//! HMAC-SHA256 request signing and verification for outbound webhook
//! deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid secret key length")]
    InvalidKey,
    #[error("malformed signature header")]
    Malformed,
    #[error("timestamp outside tolerance window")]
    TimestampOutOfRange,
    #[error("signature mismatch")]
    Mismatch,
}

/// The current unix time as a decimal string, used both as the signed
/// timestamp and the `X-HarborHook-Timestamp` header value.
pub fn now_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs();
    secs.to_string()
}

/// Compute `sha256=<hex>` over `body ∥ timestamp`.
pub fn sign(secret: &[u8], body: &[u8], timestamp: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    mac.update(timestamp.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received `X-HarborHook-Signature` header value against the
/// computed signature, rejecting timestamps outside `leeway_seconds` of now.
pub fn verify(
    secret: &[u8],
    body: &[u8],
    timestamp: &str,
    received_signature: &str,
    leeway_seconds: i64,
) -> Result<(), SignerError> {
    let ts: i64 = timestamp.parse().map_err(|_| SignerError::Malformed)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| SignerError::Malformed)?
        .as_secs() as i64;

    if (now - ts).abs() > leeway_seconds {
        return Err(SignerError::TimestampOutOfRange);
    }

    let received_hex = received_signature
        .strip_prefix("sha256=")
        .ok_or(SignerError::Malformed)?;

    let expected = sign(secret, body, timestamp);
    let expected_hex = expected.strip_prefix("sha256=").unwrap();

    let received_bytes = hex::decode(received_hex).map_err(|_| SignerError::Malformed)?;
    let expected_bytes = hex::decode(expected_hex).expect("sign() always produces valid hex");

    if received_bytes.len() != expected_bytes.len() {
        return Err(SignerError::Mismatch);
    }

    let mut diff = 0u8;
    for (a, b) in received_bytes.iter().zip(expected_bytes.iter()) {
        diff |= a ^ b;
    }

    if diff == 0 {
        Ok(())
    } else {
        Err(SignerError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let secret = b"top-secret";
        let body = br#"{"user_id":"u1"}"#;
        let ts = now_timestamp();

        let sig = sign(secret, body, &ts);
        assert!(verify(secret, body, &ts, &sig, 300).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = br#"{"user_id":"u1"}"#;
        let ts = now_timestamp();
        let sig = sign(b"secret-a", body, &ts);

        assert_eq!(
            verify(b"secret-b", body, &ts, &sig, 300),
            Err(SignerError::Mismatch)
        );
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let secret = b"top-secret";
        let body = b"payload";
        let old_ts = "1000000000";
        let sig = sign(secret, body, old_ts);

        assert_eq!(
            verify(secret, body, old_ts, &sig, 300),
            Err(SignerError::TimestampOutOfRange)
        );
    }

    #[test]
    fn verify_rejects_malformed_header() {
        let secret = b"top-secret";
        let body = b"payload";
        let ts = now_timestamp();

        assert_eq!(
            verify(secret, body, &ts, "not-a-signature", 300),
            Err(SignerError::Malformed)
        );
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = b"top-secret";
        let ts = now_timestamp();
        let sig = sign(secret, b"original", &ts);

        assert_eq!(
            verify(secret, b"tampered", &ts, &sig, 300),
            Err(SignerError::Mismatch)
        );
    }
}
