use std::collections::HashMap;
use std::sync::Arc;

use bifrost_model::ProviderId;

use crate::adapter::ProviderAdapter;

/// Name-keyed set of registered adapters. Immutable after init; the engine
/// resolves the routing tag against it on every (lazy) provider preparation.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn get(&self, provider: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
