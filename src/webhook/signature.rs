use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the runner's signature of the request body.
pub const SIGNATURE_HEADER: &str = "x-failtrack-signature-256";

fn mac_for(secret: &str) -> Result<HmacSha256> {
    if secret.is_empty() {
        return Err(AppError::WebhookVerification(
            "No runner webhook secret configured".to_string(),
        ));
    }
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))
}

/// Signature header value a runner sends for `payload`: `sha256=<hex>`.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify the HMAC-SHA256 signature of a build webhook body.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    let signature_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| AppError::WebhookVerification("Missing sha256= prefix".to_string()))?;

    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| AppError::WebhookVerification(format!("Invalid hex in signature: {e}")))?;

    let mut mac = mac_for(secret)?;
    mac.update(payload);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| AppError::WebhookVerification("Signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_payload_verifies() {
        let header = sign("test-secret", b"{\"job\":\"api\"}").unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_signature("test-secret", b"{\"job\":\"api\"}", &header).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let header = sign("test-secret", b"{\"job\":\"api\"}").unwrap();
        assert!(verify_signature("test-secret", b"{\"job\":\"web\"}", &header).is_err());
        assert!(verify_signature("other-secret", b"{\"job\":\"api\"}", &header).is_err());
    }

    #[test]
    fn test_missing_prefix() {
        assert!(verify_signature("test-secret", b"hello", "abcdef1234567890").is_err());
    }

    #[test]
    fn test_empty_secret_rejects_everything() {
        assert!(sign("", b"hello").is_err());
        assert!(verify_signature("", b"hello", "sha256=00").is_err());
    }
}
