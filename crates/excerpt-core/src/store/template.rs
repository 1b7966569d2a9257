use crate::Template;
use async_trait::async_trait;
use std::collections::HashMap;

/// Read-only template lookup by exact name.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Option<Template>;
}

/// Template catalogue held in memory, typically loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: HashMap<String, Template>,
}

impl InMemoryTemplateStore {
    /// Builds the catalogue. A later template with a duplicate name replaces
    /// the earlier one.
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|template| (template.name.clone(), template))
                .collect(),
        }
    }

    /// Parses a JSON array of `{name, content, declaredType}` objects.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        let templates: Vec<Template> = serde_json::from_slice(json)?;
        Ok(Self::new(templates))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn find_by_name(&self, name: &str) -> Option<Template> {
        self.templates.get(name).cloned()
    }
}
