//! Template Resolver: maps a caller-supplied template name to a [`Template`]
//! and applies the signing policy to its declared output type.

use crate::{
    Error, Result, Template,
    store::TemplateStore,
};
use std::{collections::BTreeSet, sync::Arc};

/// Output types that may never be signed unless configured otherwise.
pub const DEFAULT_UNSIGNED_TYPES: [&str; 2] = ["docx", "csv"];

#[derive(Clone)]
pub struct TemplateResolver {
    store: Arc<dyn TemplateStore>,
    unsigned_types: BTreeSet<String>,
}

impl TemplateResolver {
    pub fn new<I, S>(store: Arc<dyn TemplateStore>, unsigned_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            unsigned_types: unsigned_types.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact-match lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateNotFound`] if no template has that name.
    pub async fn resolve(&self, name: &str) -> Result<Template> {
        self.store
            .find_by_name(name)
            .await
            .ok_or_else(|| Error::TemplateNotFound {
                name: name.to_string(),
            })
    }

    /// # Errors
    ///
    /// Returns [`Error::SigningNotAllowed`] if a signature is required and the
    /// template's declared type is in the unsigned set.
    pub fn enforce_signing_policy(&self, template: &Template, signature_required: bool) -> Result<()> {
        if signature_required && self.unsigned_types.contains(&template.declared_type) {
            return Err(Error::SigningNotAllowed {
                declared_type: template.declared_type.clone(),
            });
        }
        Ok(())
    }
}
