//! Stripe webhook signature verification.
//!
//! Header format: `t=<unix timestamp>,v1=<hex hmac>[,v1=...]`. The signed
//! payload is `"{t}.{body}"`, keyed with the endpoint signing secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,
    #[error("Malformed signature header: {0}")]
    Malformed(&'static str),
    #[error("Signature timestamp outside tolerance")]
    TimestampOutsideTolerance,
    #[error("No signature matches the payload")]
    Mismatch,
    #[error("Signing secret rejected by HMAC")]
    InvalidKey,
}

pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: String, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), SignatureError> {
        let header = header
            .filter(|h| !h.trim().is_empty())
            .ok_or(SignatureError::MissingHeader)?;

        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse()
                            .map_err(|_| SignatureError::Malformed("timestamp is not an integer"))?,
                    )
                }
                // Undecodable candidates can never match; skip them.
                "v1" => {
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed("missing timestamp"))?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed("missing v1 signature"));
        }

        // `t` is untrusted; `abs_diff` cannot overflow.
        if now.abs_diff(timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::TimestampOutsideTolerance);
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Computes the `v1` signature for a payload. Used by tests and local tooling.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let mac = self.mac(timestamp, payload)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn header_for(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        Ok(format!("t={},v1={}", timestamp, self.sign(payload, timestamp)?))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const PAYLOAD: &[u8] = br#"{"type":"checkout.session.completed"}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test123secret456".to_string(), 300)
    }

    #[test]
    fn valid_signature_is_accepted() {
        let v = verifier();
        let header = v.header_for(PAYLOAD, NOW).unwrap();
        assert_eq!(v.verify_at(PAYLOAD, Some(&header), NOW + 10), Ok(()));
    }

    #[test]
    fn any_v1_may_match() {
        let v = verifier();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), v.sign(PAYLOAD, NOW).unwrap());
        assert_eq!(v.verify_at(PAYLOAD, Some(&header), NOW), Ok(()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let v = verifier();
        let header = v.header_for(PAYLOAD, NOW).unwrap();
        let tampered = br#"{"type":"checkout.session.completed","x":1}"#;
        assert_eq!(
            v.verify_at(tampered, Some(&header), NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let other = WebhookVerifier::new("wrong_secret".to_string(), 300);
        let header = other.header_for(PAYLOAD, NOW).unwrap();
        assert_eq!(
            verifier().verify_at(PAYLOAD, Some(&header), NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let v = verifier();
        let header = v.header_for(PAYLOAD, NOW - 600).unwrap();
        assert_eq!(
            v.verify_at(PAYLOAD, Some(&header), NOW),
            Err(SignatureError::TimestampOutsideTolerance)
        );
    }

    #[test]
    fn extreme_timestamps_are_outside_tolerance() {
        let v = verifier();
        let sig = "00".repeat(32);
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1={}", t, sig);
            assert_eq!(
                v.verify_at(b"{}", Some(&header), NOW),
                Err(SignatureError::TimestampOutsideTolerance)
            );
        }
        let header = format!("t={},v1={}", NOW, sig);
        assert_eq!(
            v.verify_at(b"{}", Some(&header), i64::MIN),
            Err(SignatureError::TimestampOutsideTolerance)
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let v = verifier();
        assert_eq!(v.verify_at(PAYLOAD, None, NOW), Err(SignatureError::MissingHeader));
        assert_eq!(v.verify_at(PAYLOAD, Some(""), NOW), Err(SignatureError::MissingHeader));
        assert!(matches!(
            v.verify_at(PAYLOAD, Some("v1=abcd"), NOW),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            v.verify_at(PAYLOAD, Some(&format!("t={}", NOW)), NOW),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            v.verify_at(PAYLOAD, Some("t=soon,v1=abcd"), NOW),
            Err(SignatureError::Malformed(_))
        ));
    }
}
