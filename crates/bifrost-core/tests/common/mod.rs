#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bifrost_common::RequestContext;
use bifrost_core::ResponseStream;
use bifrost_model::{
    BifrostError, BifrostRequest, BifrostResponse, ChatMessage, ProviderId, RequestInput,
    ResponsePayload,
};
use bifrost_provider::{
    Account, AccountError, ChunkStream, ConcurrencyAndBufferSize, Key, ProviderAdapter,
    ProviderConfig,
};
use futures_util::StreamExt;

type UnaryBehavior =
    Box<dyn Fn(&BifrostRequest) -> Result<BifrostResponse, BifrostError> + Send + Sync>;
type StreamBehavior = Box<
    dyn Fn(&BifrostRequest) -> Result<Vec<Result<BifrostResponse, BifrostError>>, BifrostError>
        + Send
        + Sync,
>;

/// Scriptable in-process adapter: every unary operation runs the same
/// behavior closure, every streaming operation the same chunk script.
pub struct MockAdapter {
    id: ProviderId,
    delay: Option<Duration>,
    chunk_delay: Option<Duration>,
    unary: UnaryBehavior,
    stream: StreamBehavior,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            id: ProviderId::from(id),
            delay: None,
            chunk_delay: None,
            unary: Box::new(|_| Ok(BifrostResponse::chat_message("ok"))),
            stream: Box::new(|_| Ok(vec![Ok(BifrostResponse::chat_delta("hi"))])),
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(id: &str, status: u16) -> Self {
        Self::new(id).with_unary(move |_| Err(BifrostError::provider_error(status, "upstream failure")))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn with_unary(
        mut self,
        behavior: impl Fn(&BifrostRequest) -> Result<BifrostResponse, BifrostError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.unary = Box::new(behavior);
        self
    }

    pub fn with_stream(
        mut self,
        behavior: impl Fn(&BifrostRequest) -> Result<Vec<Result<BifrostResponse, BifrostError>>, BifrostError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.stream = Box::new(behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    async fn serve_unary(&self, req: &BifrostRequest) -> Result<BifrostResponse, BifrostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.unary)(req)
    }

    async fn serve_stream(&self, req: &BifrostRequest) -> Result<ChunkStream, BifrostError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let items = (self.stream)(req)?;
        let stream = futures_util::stream::iter(items);
        match self.chunk_delay {
            Some(delay) => Ok(Box::pin(stream.then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))),
            None => Ok(Box::pin(stream)),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn text_completion(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.serve_unary(req).await
    }

    async fn chat_completion(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.serve_unary(req).await
    }

    async fn responses(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.serve_unary(req).await
    }

    async fn embedding(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.serve_unary(req).await
    }

    async fn speech(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.serve_unary(req).await
    }

    async fn transcription(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.serve_unary(req).await
    }

    async fn text_completion_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        self.serve_stream(req).await
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        self.serve_stream(req).await
    }

    async fn responses_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        self.serve_stream(req).await
    }

    async fn speech_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        self.serve_stream(req).await
    }

    async fn transcription_stream(
        &self,
        _ctx: &RequestContext,
        _config: &ProviderConfig,
        _key: &Key,
        req: &BifrostRequest,
    ) -> Result<ChunkStream, BifrostError> {
        self.serve_stream(req).await
    }
}

/// Fixed account snapshot for tests.
#[derive(Default)]
pub struct StaticAccount {
    configured: Vec<ProviderId>,
    keys: HashMap<ProviderId, Vec<Key>>,
    configs: HashMap<ProviderId, ProviderConfig>,
}

impl StaticAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider prepared eagerly at init.
    pub fn with_provider(mut self, id: &str, keys: Vec<Key>) -> Self {
        let id = ProviderId::from(id);
        self.configured.push(id.clone());
        self.keys.insert(id, keys);
        self
    }

    /// Provider known to the account but left for lazy preparation.
    pub fn with_lazy_provider(mut self, id: &str, keys: Vec<Key>) -> Self {
        self.keys.insert(ProviderId::from(id), keys);
        self
    }

    pub fn with_config(mut self, id: &str, config: ProviderConfig) -> Self {
        self.configs.insert(ProviderId::from(id), config);
        self
    }
}

impl Account for StaticAccount {
    fn configured_providers(&self) -> Vec<ProviderId> {
        self.configured.clone()
    }

    fn keys_for_provider(&self, provider: &ProviderId) -> Result<Vec<Key>, AccountError> {
        Ok(self.keys.get(provider).cloned().unwrap_or_default())
    }

    fn config_for_provider(&self, provider: &ProviderId) -> Option<ProviderConfig> {
        self.configs.get(provider).cloned()
    }
}

pub fn key_for_model(id: &str, model: &str, weight: f64) -> Key {
    Key::new(format!("sk-{id}"), [model.to_string()], weight).with_id(id)
}

pub fn wildcard_key(id: &str, weight: f64) -> Key {
    Key::new(format!("sk-{id}"), ["*".to_string()], weight).with_id(id)
}

pub fn sizing(concurrency: usize, buffer_size: usize) -> ProviderConfig {
    ProviderConfig {
        concurrency_and_buffer_size: ConcurrencyAndBufferSize {
            concurrency,
            buffer_size,
        },
        ..ProviderConfig::default()
    }
}

pub fn chat_request(provider: &str, model: &str) -> BifrostRequest {
    BifrostRequest::new(
        provider,
        model,
        RequestInput::ChatCompletion(bifrost_model::ChatCompletionInput {
            messages: vec![ChatMessage::user("hi")],
        }),
    )
}

/// Assistant content of a unary chat response, or the delta content of a
/// chunk.
pub fn chat_content(response: &BifrostResponse) -> Option<String> {
    let ResponsePayload::ChatCompletion(out) = &response.payload else {
        return None;
    };
    let choice = out.choices.first()?;
    if let Some(message) = &choice.message {
        return Some(message.content.clone());
    }
    choice.delta.as_ref()?.content.clone()
}

pub async fn collect_stream(
    mut stream: ResponseStream,
) -> Vec<Result<BifrostResponse, BifrostError>> {
    let mut items = Vec::new();
    while let Some(item) = stream.recv().await {
        items.push(item);
    }
    items
}
