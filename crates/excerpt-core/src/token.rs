//! Subject extraction from bearer tokens.
//!
//! The token is a JWT issued and validated upstream. This module only reads
//! the `sub` claim of the payload segment; it performs no signature or expiry
//! checks.

use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Returns the stable subject id carried by `token`.
///
/// # Errors
///
/// Returns [`Error::Unauthenticated`] if the token is not a three-segment JWT,
/// its payload is not JSON, or it has no non-empty `sub` claim.
pub fn subject(token: &str) -> Result<String> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(unauthenticated("token is not a JWT")),
    };

    // Some issuers keep the padding; the engine rejects it.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| unauthenticated("token payload is not base64url"))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|_| unauthenticated("token payload is not JSON"))?;

    match claims.sub {
        Some(sub) if !sub.is_empty() => Ok(sub),
        _ => Err(unauthenticated("token has no subject")),
    }
}

fn unauthenticated(reason: &str) -> Error {
    Error::Unauthenticated {
        reason: reason.to_string(),
    }
}
