use crate::{Error, Result};
use std::collections::BTreeMap;

/// Routing table from declared output type to topic name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicRouter {
    routes: BTreeMap<String, String>,
}

impl TopicRouter {
    pub fn new<I, K, V>(routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(ty, topic)| (ty.into(), topic.into()))
                .collect(),
        }
    }

    /// Topic for events of `declared_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPublishRoute`] if the type has no configured topic.
    pub fn route(&self, declared_type: &str) -> Result<&str> {
        self.routes
            .get(declared_type)
            .map(String::as_str)
            .ok_or_else(|| Error::NoPublishRoute {
                declared_type: declared_type.to_string(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_declared_type() {
        let router = TopicRouter::new([("pdf", "generate-excerpt-pdf"), ("csv", "generate-excerpt-csv")]);
        assert_eq!(router.route("pdf").unwrap(), "generate-excerpt-pdf");
        assert!(matches!(
            router.route("docx"),
            Err(Error::NoPublishRoute { declared_type }) if declared_type == "docx"
        ));
    }
}
