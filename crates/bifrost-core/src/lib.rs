//! The bifrost request-dispatch engine.
//!
//! One provider-agnostic request model in, the right upstream call out:
//! per-provider worker queues, weighted key selection, a plugin pipeline
//! with symmetric unwinding, fallback orchestration and the streaming
//! contract. Transport surfaces (HTTP, WebSocket) and concrete vendor
//! codecs live outside this crate and meet it at [`bifrost_provider`]'s
//! adapter and account traits.

pub mod config;
pub mod engine;
pub mod observability;
pub mod plugin;
pub mod pool;

pub use config::{BifrostConfig, InitError, QueuePolicy};
pub use engine::{Bifrost, ResponseStream};
pub use plugin::{Plugin, PluginError, PluginPipeline, PluginResult, PrePhase, ShortCircuit};
pub use pool::{ObjectPool, PoolStats, Pooled};
