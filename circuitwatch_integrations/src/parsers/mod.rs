//! Parser registry backed by a static provider-type table.

pub mod ical;

use circuitwatch_core::{MaintenanceParser, ParserRegistry};
use std::collections::HashMap;
use std::sync::Arc;

pub use ical::BcopCalendarParser;

#[derive(Clone)]
struct Registration {
    content_types: Vec<String>,
    parser: Arc<dyn MaintenanceParser>,
}

/// Maps provider types to a parser and the content types it reads.
///
/// Provider types with no entry resolve to the fallback, when one is set.
#[derive(Clone, Default)]
pub struct StaticParserRegistry {
    entries: HashMap<String, Registration>,
    fallback: Option<Registration>,
}

impl StaticParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        provider_type: impl Into<String>,
        content_types: &[&str],
        parser: Arc<dyn MaintenanceParser>,
    ) -> Self {
        self.entries.insert(
            provider_type.into().to_ascii_lowercase(),
            Registration {
                content_types: normalize(content_types),
                parser,
            },
        );
        self
    }

    pub fn with_fallback(mut self, content_types: &[&str], parser: Arc<dyn MaintenanceParser>) -> Self {
        self.fallback = Some(Registration {
            content_types: normalize(content_types),
            parser,
        });
        self
    }

    fn resolve(&self, provider_type: &str) -> Option<&Registration> {
        self.entries
            .get(&provider_type.to_ascii_lowercase())
            .or(self.fallback.as_ref())
    }
}

fn normalize(content_types: &[&str]) -> Vec<String> {
    content_types.iter().map(|c| c.to_ascii_lowercase()).collect()
}

impl ParserRegistry for StaticParserRegistry {
    fn content_types(&self, provider_type: &str) -> Option<Vec<String>> {
        self.resolve(provider_type).map(|r| r.content_types.clone())
    }

    fn init_parser(&self, provider_type: &str) -> Option<Arc<dyn MaintenanceParser>> {
        self.resolve(provider_type).map(|r| r.parser.clone())
    }
}

/// Every provider is read as a BCOP calendar unless registered otherwise.
pub fn default_registry() -> StaticParserRegistry {
    StaticParserRegistry::new().with_fallback(&[ical::CONTENT_TYPE], Arc::new(BcopCalendarParser))
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuitwatch_core::{Maintenance, NotificationPayload, ParseError};

    struct Nothing;

    impl MaintenanceParser for Nothing {
        fn parse(
            &self,
            _provider_type: &str,
            _payloads: &[NotificationPayload],
        ) -> Result<Vec<Maintenance>, ParseError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn registered_types_win_over_fallback() {
        let registry = default_registry().register("Zayo", &["TEXT/HTML"], Arc::new(Nothing));
        assert_eq!(
            registry.content_types("zayo"),
            Some(vec!["text/html".to_string()])
        );
        assert_eq!(
            registry.content_types("ntt"),
            Some(vec!["text/calendar".to_string()])
        );
        assert!(registry.init_parser("anything").is_some());
    }

    #[test]
    fn without_fallback_unknown_types_resolve_to_none() {
        let registry = StaticParserRegistry::new().register("zayo", &["text/html"], Arc::new(Nothing));
        assert!(registry.content_types("ntt").is_none());
        assert!(registry.init_parser("ntt").is_none());
    }
}
