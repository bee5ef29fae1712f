use bifrost_model::ProviderId;

use crate::config::ProviderConfig;
use crate::key::Key;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("unknown provider: {0}")]
    UnknownProvider(ProviderId),
    #[error("{0}")]
    Other(String),
}

/// Supplies providers, keys and config to the engine.
///
/// Implementations return snapshots by value: the engine reads keys on every
/// dequeue, so a control plane can swap key sets at runtime and readers
/// always observe a consistent copy.
pub trait Account: Send + Sync {
    /// Providers to prepare eagerly at init. Others are prepared lazily on
    /// first use.
    fn configured_providers(&self) -> Vec<ProviderId>;

    fn keys_for_provider(&self, provider: &ProviderId) -> Result<Vec<Key>, AccountError>;

    /// `None` means "use defaults"; lazy-prepared providers commonly have no
    /// explicit config.
    fn config_for_provider(&self, provider: &ProviderId) -> Option<ProviderConfig>;
}
