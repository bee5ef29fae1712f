use std::pin::Pin;

use async_trait::async_trait;
use bifrost_common::RequestContext;
use bifrost_model::{BifrostError, BifrostRequest, BifrostResponse, ProviderId};
use futures_core::Stream;

use crate::config::ProviderConfig;
use crate::key::Key;

/// Lazy sequence of canonical chunks produced by a streaming adapter call.
/// The stream ends when the upstream closes it; a mid-stream failure is the
/// final item.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<BifrostResponse, BifrostError>> + Send>>;

/// One upstream vendor codec plus its HTTP client.
///
/// Adapters own vendor JSON translation, network I/O, transient-retry and
/// timeout enforcement per their [`NetworkConfig`](crate::NetworkConfig); the
/// engine never performs HTTP itself. Every operation defaults to an
/// `unsupported` failure so an adapter only implements the request types its
/// vendor actually has.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn text_completion(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "text_completion",
        ))
    }

    async fn chat_completion(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "chat_completion",
        ))
    }

    async fn responses(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        Err(BifrostError::unsupported_provider(&self.id(), "responses"))
    }

    async fn embedding(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        Err(BifrostError::unsupported_provider(&self.id(), "embedding"))
    }

    async fn speech(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        Err(BifrostError::unsupported_provider(&self.id(), "speech"))
    }

    async fn transcription(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "transcription",
        ))
    }

    async fn text_completion_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "text_completion_stream",
        ))
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "chat_completion_stream",
        ))
    }

    async fn responses_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "responses_stream",
        ))
    }

    async fn speech_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "speech_stream",
        ))
    }

    async fn transcription_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        _req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        Err(BifrostError::unsupported_provider(
            &self.id(),
            "transcription_stream",
        ))
    }
}
