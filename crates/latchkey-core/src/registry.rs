//! Static allow-list of known actors.

use crate::config::ActorsConfig;

/// Membership check against the configured radio identifiers.
///
/// The list is small and human-curated, so lookups are a linear scan.
/// There is no mutation API: the list is fixed for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct ActorRegistry {
    known: Vec<String>,
}

impl ActorRegistry {
    /// Create a registry from a list of identifiers.
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a registry from the `[actors]` configuration section.
    #[must_use]
    pub fn from_config(config: &ActorsConfig) -> Self {
        Self::new(config.known.iter().cloned())
    }

    /// Case-insensitive exact match against the allow-list.
    #[must_use]
    pub fn is_known(&self, identifier: &str) -> bool {
        self.known
            .iter()
            .any(|known| known.eq_ignore_ascii_case(identifier))
    }

    /// Number of allow-listed identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether the allow-list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_is_case_insensitive() {
        let registry = ActorRegistry::new(["AA:BB:CC:DD:EE:FF"]);
        assert!(registry.is_known("AA:BB:CC:DD:EE:FF"));
        assert!(registry.is_known("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_known_requires_exact_match() {
        let registry = ActorRegistry::new(["AA:BB:CC:DD:EE:FF"]);
        assert!(!registry.is_known("AA:BB:CC:DD:EE"));
        assert!(!registry.is_known("AA:BB:CC:DD:EE:FF:00"));
        assert!(!registry.is_known(""));
    }

    #[test]
    fn test_empty_registry_knows_nobody() {
        let registry = ActorRegistry::default();
        assert!(registry.is_empty());
        assert!(!registry.is_known("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_from_config() {
        let config = ActorsConfig {
            known: vec!["11:22:33:44:55:66".into(), "AA:BB:CC:DD:EE:FF".into()],
        };
        let registry = ActorRegistry::from_config(&config);
        assert_eq!(registry.len(), 2);
        assert!(registry.is_known("11:22:33:44:55:66"));
    }
}
