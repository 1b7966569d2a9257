//! Per-call context.
//!
//! A [`CallContext`] is built once at the transport boundary and passed by
//! reference through every operation. It bundles the trace id, the subject
//! derived from the caller's token, the signature references and the
//! provenance fields. Nothing below the boundary reads ambient state.

use crate::{Error, Result, SignatureRefs, SourceContext, token};

/// Wire names of the headers this service consumes.
pub mod header {
    pub const TRACE_ID: &str = "X-B3-TraceId";
    pub const ACCESS_TOKEN: &str = "X-Access-Token";
    pub const DIGITAL_SIGNATURE: &str = "X-Digital-Signature";
    pub const DIGITAL_SIGNATURE_DERIVED: &str = "X-Digital-Signature-Derived";
    pub const SOURCE_SYSTEM: &str = "X-Source-System";
    pub const SOURCE_APPLICATION: &str = "X-Source-Application";
    pub const SOURCE_BUSINESS_PROCESS: &str = "X-Source-Business-Process";
    pub const SOURCE_BUSINESS_ACTIVITY: &str = "X-Source-Business-Activity";
}

/// Security headers of one call, as received.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub access_token: Option<String>,
    pub digital_signature: Option<String>,
    pub digital_signature_derived: Option<String>,
}

impl SecurityContext {
    /// Returns both signature references, or the header names of every
    /// reference that is absent.
    pub fn signature_refs(&self) -> core::result::Result<SignatureRefs, Vec<&'static str>> {
        match (&self.digital_signature, &self.digital_signature_derived) {
            (Some(primary), Some(derived)) => Ok(SignatureRefs {
                primary: primary.clone(),
                derived: derived.clone(),
            }),
            (primary, derived) => {
                let mut missing = Vec::with_capacity(2);
                if primary.is_none() {
                    missing.push(header::DIGITAL_SIGNATURE);
                }
                if derived.is_none() {
                    missing.push(header::DIGITAL_SIGNATURE_DERIVED);
                }
                Err(missing)
            }
        }
    }
}

/// Immutable context threaded through create, retrieve and status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    trace_id: String,
    subject: String,
    security: SecurityContext,
    source: SourceContext,
}

impl CallContext {
    /// Builds the context, deriving the subject from the access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] if the token is absent or carries
    /// no subject.
    pub fn resolve(
        trace_id: impl Into<String>,
        security: SecurityContext,
        source: SourceContext,
    ) -> Result<Self> {
        let token = security
            .access_token
            .as_deref()
            .ok_or_else(|| Error::Unauthenticated {
                reason: format!("missing `{}` header", header::ACCESS_TOKEN),
            })?;
        let subject = token::subject(token)?;

        Ok(Self {
            trace_id: trace_id.into(),
            subject,
            security,
            source,
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Stable subject id of the caller.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn source(&self) -> &SourceContext {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::token_for;

    #[test]
    fn both_refs_present() {
        let ctx = SecurityContext {
            access_token: None,
            digital_signature: Some("sig".into()),
            digital_signature_derived: Some("sig-derived".into()),
        };
        let refs = ctx.signature_refs().unwrap();
        assert_eq!(refs.primary, "sig");
        assert_eq!(refs.derived, "sig-derived");
    }

    #[test]
    fn missing_refs_are_named_in_order() {
        let missing = SecurityContext::default().signature_refs().unwrap_err();
        assert_eq!(
            missing,
            vec![header::DIGITAL_SIGNATURE, header::DIGITAL_SIGNATURE_DERIVED]
        );

        let only_primary = SecurityContext {
            digital_signature: Some("sig".into()),
            ..Default::default()
        };
        assert_eq!(
            only_primary.signature_refs().unwrap_err(),
            vec![header::DIGITAL_SIGNATURE_DERIVED]
        );
    }

    #[test]
    fn resolve_requires_a_token() {
        let err = CallContext::resolve("trace", SecurityContext::default(), Default::default())
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn resolve_derives_subject() {
        let security = SecurityContext {
            access_token: Some(token_for("3f1c9b")),
            ..Default::default()
        };
        let ctx = CallContext::resolve("trace", security, Default::default()).unwrap();
        assert_eq!(ctx.subject(), "3f1c9b");
        assert_eq!(ctx.trace_id(), "trace");
    }
}
