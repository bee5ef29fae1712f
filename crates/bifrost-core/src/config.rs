use std::sync::Arc;

use bifrost_model::ProviderId;
use bifrost_provider::{Account, AccountError, KeySelector, ProviderAdapter};

use crate::plugin::Plugin;

/// Behaviour when a provider queue is full at enqueue time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Block the caller until a slot frees up.
    #[default]
    Wait,
    /// Fail immediately with a 503-class `QueueFull` error. For
    /// latency-sensitive deployments that prefer shedding to queueing.
    DropExcess,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("no adapter registered for configured provider: {0}")]
    MissingAdapter(ProviderId),
    #[error("plugin name must not be empty (position {0})")]
    UnnamedPlugin(usize),
    #[error("duplicate plugin name: {0}")]
    DuplicatePlugin(String),
    #[error(transparent)]
    Account(#[from] AccountError),
}

/// Everything [`crate::Bifrost::init`] needs.
pub struct BifrostConfig {
    pub account: Arc<dyn Account>,
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub queue_policy: QueuePolicy,
    /// Overrides the default weighted key selector when set.
    pub key_selector: Option<KeySelector>,
    /// Request envelopes placed into the pool up front.
    pub pool_prewarm: usize,
}

impl BifrostConfig {
    pub fn new(account: Arc<dyn Account>) -> Self {
        Self {
            account,
            adapters: Vec::new(),
            plugins: Vec::new(),
            queue_policy: QueuePolicy::default(),
            key_selector: None,
            pool_prewarm: 0,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn with_key_selector(mut self, selector: KeySelector) -> Self {
        self.key_selector = Some(selector);
        self
    }
}
