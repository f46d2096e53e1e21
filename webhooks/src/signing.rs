//! HMAC-SHA256 payload signing
//!
//! The signature covers the exact request body bytes and is sent as
//! `X-Webhook-Signature: sha256=<hex>`.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature header name
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Event type header name
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// Delivery id header name
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";

/// Unix timestamp header name
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

const SCHEME_PREFIX: &str = "sha256=";

/// Signature header value for `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::InvalidSecret(e.to_string()))?;
    mac.update(body);
    Ok(format!("{}{}", SCHEME_PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Constant-time check of a received signature header
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(encoded) = header.trim().strip_prefix(SCHEME_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let body = br#"{"event":"case.status_changed"}"#;
        let sig = sign("s3cret", body).unwrap();

        assert!(verify("s3cret", body, &sig));
        assert!(!verify("other", body, &sig));
        assert!(!verify("s3cret", b"{}", &sig));
        assert!(!verify("s3cret", body, sig.trim_start_matches("sha256=")));
        assert!(!verify("s3cret", body, "sha256=zz"));
    }
}
