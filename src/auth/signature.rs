use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::fmt;
use subtle::ConstantTimeEq;

/// Header carrying the hex HMAC-SHA512 of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-webhook-hmac-sha512";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Secret configured but no signature header sent
    Missing,
    /// Header is not valid hex
    Malformed,
    Mismatch,
}

impl SignatureError {
    /// Short reason for security logs.
    pub fn reason(&self) -> &'static str {
        match self {
            SignatureError::Missing => "missing_signature",
            SignatureError::Malformed => "malformed_signature",
            SignatureError::Mismatch => "signature_mismatch",
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::Missing => write!(f, "missing webhook signature"),
            SignatureError::Malformed => write!(f, "malformed webhook signature"),
            SignatureError::Mismatch => write!(f, "invalid webhook signature"),
        }
    }
}

impl std::error::Error for SignatureError {}

fn mac_bytes(secret: &[u8], body: &[u8]) -> Option<Vec<u8>> {
    // HMAC accepts keys of any length; this only fails for fixed-key MACs
    let mut mac = HmacSha512::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Lowercase hex HMAC-SHA512 of `body`.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    mac_bytes(secret, body).map(hex::encode).unwrap_or_default()
}

/// Verifies the webhook signature header against the raw body.
///
/// With no secret configured every request passes.
pub fn verify_webhook(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), SignatureError> {
    let Some(secret) = secret else {
        return Ok(());
    };

    let provided = headers
        .get(SIGNATURE_HEADER)
        .ok_or(SignatureError::Missing)?
        .to_str()
        .map_err(|_| SignatureError::Malformed)?
        .trim();
    if provided.is_empty() {
        return Err(SignatureError::Missing);
    }
    let provided = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;

    let expected = mac_bytes(secret.as_bytes(), body).ok_or(SignatureError::Mismatch)?;
    if bool::from(expected.ct_eq(&provided)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
