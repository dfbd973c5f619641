use std::collections::HashMap;
use std::sync::Arc;

use super::{ProviderAdapter, ProviderKind};

/// Registry of configured provider adapters, keyed by provider kind.
#[derive(Clone, Default)]
pub struct Registry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any earlier adapter for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Builder-style [`Registry::register`].
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Providers with a registered adapter.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }
}
