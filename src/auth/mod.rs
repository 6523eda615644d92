//! Request authentication: admin bearer tokens and webhook signatures.

use axum::http::HeaderMap;

mod signature;
#[cfg(test)]
mod tests;

pub use signature::{compute_signature, verify_webhook, SignatureError, SIGNATURE_HEADER};

/// Bearer token from the `Authorization` header. The scheme is matched
/// case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    let (scheme, token) = auth_header
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }
    Ok(token.to_string())
}

#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    Missing,
    /// Not `Bearer <token>`, or not valid header text.
    InvalidFormat,
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "missing bearer token"),
            TokenError::InvalidFormat => write!(f, "malformed Authorization header"),
            TokenError::Empty => write!(f, "empty bearer token"),
        }
    }
}

impl std::error::Error for TokenError {}
