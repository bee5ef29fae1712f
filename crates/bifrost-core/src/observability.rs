//! Stable hook points for external telemetry and circuit-breaker plugins.
//!
//! These keys and predicates are the only coupling surface between the core
//! and observability subsystems; everything else a plugin needs travels in
//! [`bifrost_model::ExtraFields`] or the plugin tag map.

use bifrost_common::RequestContext;
use bifrost_model::{BifrostError, RequestType};

/// Well-known context keys, readable through [`context_value`].
pub mod keys {
    pub const REQUEST_ID: &str = "request_id";
    pub const FALLBACK_REQUEST_ID: &str = "fallback_request_id";
    pub const SELECTED_KEY_ID: &str = "selected_key_id";
    pub const STREAM_END_INDICATOR: &str = "stream_end_indicator";
}

/// Uniform read access to the well-known context values, for plugins that
/// export them generically rather than through the typed accessors.
pub fn context_value(ctx: &RequestContext, key: &str) -> Option<serde_json::Value> {
    match key {
        keys::REQUEST_ID => Some(serde_json::Value::String(ctx.request_id().to_string())),
        keys::FALLBACK_REQUEST_ID => ctx
            .fallback_request_id()
            .map(|id| serde_json::Value::String(id.to_string())),
        keys::SELECTED_KEY_ID => ctx.selected_key_id().map(serde_json::Value::String),
        keys::STREAM_END_INDICATOR => Some(serde_json::Value::Bool(ctx.stream_end_reached())),
        _ => None,
    }
}

pub fn is_server_error(err: &BifrostError) -> bool {
    matches!(err.status_code, Some(status) if (500..600).contains(&status))
}

pub fn is_rate_limit_error(err: &BifrostError) -> bool {
    err.status_code == Some(429)
}

pub fn is_stream_request_type(request_type: RequestType) -> bool {
    request_type.is_stream()
}
