//! Named provider lookup

use crate::provider::Provider;
use crate::{Error, Result};
use std::sync::Arc;

/// Providers available to a runner, in registration order
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a provider with the same name is already registered
    /// or the name is empty.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        let name = provider.name();
        if name.trim().is_empty() {
            return Err(Error::Config("provider name cannot be empty".to_string()));
        }
        if self.get(name).is_some() {
            return Err(Error::Config(format!("provider '{}' is already registered", name)));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("exa"))).unwrap();
        registry.register(Arc::new(MockProvider::new("tavily"))).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.provider_names(), vec!["exa", "tavily"]);
        assert!(registry.get("exa").is_some());
        assert!(registry.get("brave").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("exa"))).unwrap();
        let err = registry.register(Arc::new(MockProvider::new("exa"))).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }
}
