//! Client for the external digital-signature verification service.

use async_trait::async_trait;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Verdict on a well-formed verification call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid { reason: String },
}

/// The verification call itself did not produce a verdict.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum VerifierError {
    /// The verifier refused the request (4xx).
    #[error("{reason}")]
    BadRequest { reason: String },

    /// The verifier failed (5xx) or could not be reached in time.
    #[error("{reason}")]
    Unavailable { reason: String },
}

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Checks `signature` against the canonical serialization `data`.
    async fn verify(&self, signature: &str, data: &str) -> Result<Verification, VerifierError>;
}

/// Stand-in used when no verifier is deployed. Every call reports the
/// verifier as unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredVerifier;

#[async_trait]
impl SignatureVerifier for UnconfiguredVerifier {
    async fn verify(&self, _signature: &str, _data: &str) -> Result<Verification, VerifierError> {
        Err(VerifierError::Unavailable {
            reason: "no signature verifier configured".to_string(),
        })
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    signature: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(default)]
    error: Option<VerifyFailure>,
}

#[derive(Deserialize)]
struct VerifyFailure {
    message: String,
}

/// Verifier reached over HTTP: `POST <url>` with `{signature, data}`,
/// answered by `{valid, error?: {message}}`.
#[derive(Clone, Debug)]
pub struct HttpSignatureVerifier {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpSignatureVerifier {
    /// Builds a verifier whose every call is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(url: reqwest::Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SignatureVerifier for HttpSignatureVerifier {
    async fn verify(&self, signature: &str, data: &str) -> Result<Verification, VerifierError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&VerifyRequest { signature, data })
            .send()
            .await
            .map_err(|e| VerifierError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(VerifierError::BadRequest {
                reason: format!("verifier answered {status}"),
            });
        }
        if !status.is_success() {
            return Err(VerifierError::Unavailable {
                reason: format!("verifier answered {status}"),
            });
        }

        let body: VerifyResponse = response.json().await.map_err(|e| VerifierError::BadRequest {
            reason: format!("unreadable verifier response: {e}"),
        })?;
        if body.valid {
            Ok(Verification::Valid)
        } else {
            Ok(Verification::Invalid {
                reason: body
                    .error
                    .map_or_else(|| "signature is not valid".to_string(), |e| e.message),
            })
        }
    }
}
