use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;
use crate::request::RequestType;

/// Coarse classification of a gateway failure, independent of provider wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoEligibleKey,
    QueueFull,
    Cancelled,
    DeadlineExceeded,
    ProviderTransport,
    ProviderClient,
    PluginShortCircuit,
    PluginPipeline,
    InvalidRequest,
    UnsupportedProvider,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoEligibleKey => "no_eligible_key",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::ProviderTransport => "provider_transport",
            ErrorKind::ProviderClient => "provider_client",
            ErrorKind::PluginShortCircuit => "plugin_short_circuit",
            ErrorKind::PluginPipeline => "plugin_pipeline",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::UnsupportedProvider => "unsupported_provider",
        }
    }
}

/// Per-stream delivery directives a plugin may attach to an error chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamControl {
    /// Whether the core logs the error chunk before forwarding it.
    pub log_error: bool,
    /// Drop the chunk silently instead of delivering it.
    pub skip_stream: bool,
}

impl Default for StreamControl {
    fn default() -> Self {
        Self {
            log_error: true,
            skip_stream: false,
        }
    }
}

/// Routing facts attached to an error for observability parity with
/// [`crate::response::ExtraFields`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_requested: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
}

/// Structured failure envelope returned from every gateway operation.
///
/// `is_bifrost_error` distinguishes failures originating inside the gateway
/// from upstream provider failures carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifrostError {
    pub kind: ErrorKind,
    pub is_bifrost_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    /// Explicit fallback override; `None` falls back to the kind's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_control: Option<StreamControl>,
    #[serde(default)]
    pub extra: ErrorExtra,
}

impl BifrostError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            is_bifrost_error: true,
            status_code: None,
            error_type: None,
            code: None,
            message: message.into(),
            allow_fallbacks: None,
            stream_control: None,
            extra: ErrorExtra::default(),
        }
    }

    pub fn no_eligible_key(provider: &ProviderId, model: &str) -> Self {
        Self::new(
            ErrorKind::NoEligibleKey,
            format!("no eligible key for provider {provider} and model {model}"),
        )
    }

    pub fn queue_full(provider: &ProviderId) -> Self {
        Self::new(
            ErrorKind::QueueFull,
            format!("request queue for provider {provider} is full"),
        )
        .with_status(503)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded, "request deadline exceeded")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn unsupported_provider(provider: &ProviderId, what: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedProvider,
            format!("provider {provider} does not support {what}"),
        )
    }

    /// Upstream HTTP failure classified by status: 429 and 5xx are
    /// transport-class (retryable elsewhere), other 4xx are client-class.
    pub fn provider_error(status: u16, message: impl Into<String>) -> Self {
        let kind = if status == 429 || (500..600).contains(&status) {
            ErrorKind::ProviderTransport
        } else {
            ErrorKind::ProviderClient
        };
        let mut err = Self::new(kind, message).with_status(status);
        err.is_bifrost_error = false;
        err
    }

    /// Network-level failure with no HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::ProviderTransport, message);
        err.is_bifrost_error = false;
        err
    }

    pub fn short_circuit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PluginShortCircuit, message)
    }

    /// A hook itself failed; terminal, never retried on fallbacks.
    pub fn pipeline(plugin: &str, message: impl fmt::Display) -> Self {
        let mut err = Self::new(
            ErrorKind::PluginPipeline,
            format!("plugin {plugin} failed: {message}"),
        );
        err.allow_fallbacks = Some(false);
        err
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_allow_fallbacks(mut self, allow: bool) -> Self {
        self.allow_fallbacks = Some(allow);
        self
    }

    pub fn with_stream_control(mut self, control: StreamControl) -> Self {
        self.stream_control = Some(control);
        self
    }

    /// Whether the fallback orchestrator may try the next (provider, model).
    ///
    /// An explicit `allow_fallbacks` always wins; otherwise the kind decides,
    /// with client-class 4xx (except 429, which classifies as transport)
    /// terminal by default.
    pub fn fallback_allowed(&self) -> bool {
        if let Some(allow) = self.allow_fallbacks {
            return allow;
        }
        match self.kind {
            ErrorKind::Cancelled
            | ErrorKind::DeadlineExceeded
            | ErrorKind::PluginPipeline
            | ErrorKind::InvalidRequest
            | ErrorKind::ProviderClient => false,
            ErrorKind::NoEligibleKey
            | ErrorKind::QueueFull
            | ErrorKind::ProviderTransport
            | ErrorKind::PluginShortCircuit
            | ErrorKind::UnsupportedProvider => true,
        }
    }

    pub fn skip_stream(&self) -> bool {
        self.stream_control.map(|c| c.skip_stream).unwrap_or(false)
    }

    pub fn log_error(&self) -> bool {
        self.stream_control.map(|c| c.log_error).unwrap_or(true)
    }
}

impl fmt::Display for BifrostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "{}: {} (status {status})", self.kind.as_str(), self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl Error for BifrostError {}
