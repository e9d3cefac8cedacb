//! HMAC-SHA256 signature verification for client payment proofs and
//! gateway webhooks.
//!
//! Both usages share one primitive: hex-encoded HMAC over a message,
//! compared in constant time. Absent or malformed inputs verify as false,
//! never as an error.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn verify(message: &[u8], signature_hex: &str, secret: &str) -> bool {
    if message.is_empty() || signature_hex.is_empty() || secret.is_empty() {
        return false;
    }
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Client-submitted proof: HMAC over `"<provider_order_ref>|<provider_payment_ref>"`.
pub fn verify_payment_proof(
    provider_order_ref: Option<&str>,
    provider_payment_ref: Option<&str>,
    signature: Option<&str>,
    secret: &str,
) -> bool {
    let (Some(order_ref), Some(payment_ref), Some(signature)) =
        (provider_order_ref, provider_payment_ref, signature)
    else {
        return false;
    };
    let message = format!("{order_ref}|{payment_ref}");
    verify(message.as_bytes(), signature, secret)
}

/// Webhook payload: HMAC over the raw body bytes exactly as received.
/// Reparsing and re-serializing would break the signature.
pub fn verify_webhook(raw_body: &[u8], signature: Option<&str>, secret: &str) -> bool {
    match signature {
        Some(signature) => verify(raw_body, signature, secret),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123";

    fn sign(message: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_payment_proof_roundtrip() {
        let sig = sign(b"order_abc|pay_xyz", SECRET);
        assert!(verify_payment_proof(
            Some("order_abc"),
            Some("pay_xyz"),
            Some(&sig),
            SECRET
        ));
    }

    #[test]
    fn test_payment_proof_tampered() {
        let sig = sign(b"order_abc|pay_xyz", SECRET);
        assert!(!verify_payment_proof(
            Some("order_abc"),
            Some("pay_other"),
            Some(&sig),
            SECRET
        ));
        assert!(!verify_payment_proof(
            Some("order_abc"),
            Some("pay_xyz"),
            Some(&sig),
            "wrong_secret"
        ));
    }

    #[test]
    fn test_payment_proof_missing_fields() {
        let sig = sign(b"order_abc|pay_xyz", SECRET);
        assert!(!verify_payment_proof(None, Some("pay_xyz"), Some(&sig), SECRET));
        assert!(!verify_payment_proof(Some("order_abc"), None, Some(&sig), SECRET));
        assert!(!verify_payment_proof(Some("order_abc"), Some("pay_xyz"), None, SECRET));
    }

    #[test]
    fn test_webhook_body_exact_bytes() {
        let body = br#"{"event":"payment.captured","payload":{}}"#;
        let sig = sign(body, SECRET);
        assert!(verify_webhook(body, Some(&sig), SECRET));

        // Whitespace-only difference must fail.
        let reserialized = br#"{"event": "payment.captured", "payload": {}}"#;
        assert!(!verify_webhook(reserialized, Some(&sig), SECRET));
    }

    #[test]
    fn test_webhook_rejects_garbage_signature() {
        assert!(!verify_webhook(b"{}", Some("not-hex!"), SECRET));
        assert!(!verify_webhook(b"{}", None, SECRET));
        assert!(!verify_webhook(b"", Some("abcd"), SECRET));
    }
}
