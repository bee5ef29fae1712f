//! Shared primitives for the bifrost gateway core.
//!
//! This crate carries the request-scoped context and ID types only; it must
//! stay free of provider, transport and engine concerns so every other
//! member can depend on it.

mod context;
mod ids;

pub use context::RequestContext;
pub use ids::RequestId;
