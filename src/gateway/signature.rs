//! Webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256(secret, "<t>.<raw body>")>`.
//! Any parse failure, stale timestamp or mismatch fails closed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produces a header value for `payload`. Used by the sandbox gateway and tests.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    match mac_for(secret, timestamp, payload) {
        Ok(mac) => format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        ),
        Err(_) => format!("t={},v1=", timestamp),
    }
}

pub fn verify(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = Some(v);
        }
    }

    let timestamp: i64 = timestamp
        .ok_or(SignatureError::Malformed)?
        .parse()
        .map_err(|_| SignatureError::Malformed)?;
    let received = hex::decode(signature.ok_or(SignatureError::Malformed)?)
        .map_err(|_| SignatureError::Malformed)?;

    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    // verify_slice compares in constant time.
    mac_for(secret, timestamp, payload)?
        .verify_slice(&received)
        .map_err(|_| SignatureError::Mismatch)
}

/// Convenience wrapper used by adapters: verifies against the current clock.
pub fn verify_now(secret: &str, payload: &[u8], header: &str) -> bool {
    let now = chrono::Utc::now().timestamp();
    match verify(secret, payload, header, DEFAULT_TOLERANCE_SECS, now) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook signature rejected");
            false
        }
    }
}
