use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing of one provider's queue and worker set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyAndBufferSize {
    /// Worker tasks draining the provider queue.
    pub concurrency: usize,
    /// Bounded queue capacity; enqueue behaviour past this point is governed
    /// by the instance queue policy.
    pub buffer_size: usize,
}

impl Default for ConcurrencyAndBufferSize {
    fn default() -> Self {
        Self {
            concurrency: 10,
            buffer_size: 100,
        }
    }
}

/// Network behaviour an adapter must enforce for its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub default_request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_initial: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_request_timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_backoff_initial: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(5),
        }
    }
}

/// Outbound proxy for upstream egress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Per-provider configuration the core recognises.
///
/// `meta` is provider-opaque JSON handed to the adapter untouched; typed
/// validation of vendor-specific settings happens inside the adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub concurrency_and_buffer_size: ConcurrencyAndBufferSize,
    pub network: NetworkConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}
