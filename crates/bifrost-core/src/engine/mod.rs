use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use bifrost_common::RequestContext;
use bifrost_model::{
    BifrostError, BifrostRequest, BifrostResponse, ErrorKind, ProviderId, RequestType,
};
use bifrost_provider::{
    ProviderAdapter, ProviderConfig, ProviderRegistry, weighted_key_selector,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{BifrostConfig, InitError, QueuePolicy};
use crate::plugin::PluginPipeline;
use crate::pool::{ObjectPool, PoolStats};

mod dispatch;
mod envelope;
mod worker;

pub use envelope::ResponseStream;

use envelope::Envelope;
use worker::WorkerShared;

/// One prepared provider: its bounded queue plus the workers draining it.
pub(crate) struct ProviderRuntime {
    pub tx: mpsc::Sender<Envelope>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct Engine {
    registry: ProviderRegistry,
    pipeline: Arc<PluginPipeline>,
    worker_shared: Arc<WorkerShared>,
    /// Copy-on-write provider map: replaced wholesale at init, lazy-prepare
    /// and shutdown, read lock-free everywhere else.
    providers: ArcSwap<HashMap<ProviderId, Arc<ProviderRuntime>>>,
    /// Serialises lazy preparation so concurrent first-touch of one provider
    /// builds a single queue.
    prepare_lock: tokio::sync::Mutex<()>,
    requests: ObjectPool<BifrostRequest>,
    queue_policy: QueuePolicy,
    shutting_down: AtomicBool,
}

/// The gateway engine. Cheap to clone; all clones share one engine.
///
/// Dropping every clone without calling [`Bifrost::shutdown`] leaves worker
/// tasks parked on their queues; always shut down explicitly (or via
/// [`Bifrost::shutdown_on_signal`]).
#[derive(Clone)]
pub struct Bifrost {
    inner: Arc<Engine>,
}

impl Bifrost {
    /// Validates the account and plugin list, prepares every configured
    /// provider and launches its workers. Must run inside a tokio runtime.
    pub fn init(config: BifrostConfig) -> Result<Self, InitError> {
        let BifrostConfig {
            account,
            adapters,
            plugins,
            queue_policy,
            key_selector,
            pool_prewarm,
        } = config;

        let mut names = HashSet::new();
        for (position, plugin) in plugins.iter().enumerate() {
            if plugin.name().is_empty() {
                return Err(InitError::UnnamedPlugin(position));
            }
            if !names.insert(plugin.name().to_string()) {
                return Err(InitError::DuplicatePlugin(plugin.name().to_string()));
            }
        }

        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }

        let pipeline = Arc::new(PluginPipeline::new(plugins));
        let worker_shared = Arc::new(WorkerShared {
            account: account.clone(),
            key_selector: key_selector.unwrap_or_else(weighted_key_selector),
            pipeline: pipeline.clone(),
        });
        let requests = ObjectPool::with_reset(BifrostRequest::default, BifrostRequest::reset);
        requests.prewarm(pool_prewarm);

        let engine = Engine {
            registry,
            pipeline,
            worker_shared,
            providers: ArcSwap::from_pointee(HashMap::new()),
            prepare_lock: tokio::sync::Mutex::new(()),
            requests,
            queue_policy,
            shutting_down: AtomicBool::new(false),
        };

        let mut map = HashMap::new();
        for provider in account.configured_providers() {
            let Some(adapter) = engine.registry.get(&provider) else {
                return Err(InitError::MissingAdapter(provider));
            };
            // Surfaces account misconfiguration at init instead of on the
            // first request.
            account.keys_for_provider(&provider)?;
            let config = account.config_for_provider(&provider).unwrap_or_default();
            map.insert(provider.clone(), engine.spawn_runtime(provider, adapter, config));
        }
        info!(providers = map.len(), "bifrost gateway initialized");
        engine.providers.store(Arc::new(map));

        Ok(Self {
            inner: Arc::new(engine),
        })
    }

    pub async fn text_completion_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.inner
            .execute_unary(ctx, request, RequestType::TextCompletion)
            .await
    }

    pub async fn chat_completion_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.inner
            .execute_unary(ctx, request, RequestType::ChatCompletion)
            .await
    }

    pub async fn responses_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.inner
            .execute_unary(ctx, request, RequestType::Responses)
            .await
    }

    pub async fn embedding_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.inner
            .execute_unary(ctx, request, RequestType::Embedding)
            .await
    }

    pub async fn speech_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.inner
            .execute_unary(ctx, request, RequestType::Speech)
            .await
    }

    pub async fn transcription_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<BifrostResponse, BifrostError> {
        self.inner
            .execute_unary(ctx, request, RequestType::Transcription)
            .await
    }

    pub async fn text_completion_stream_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<ResponseStream, BifrostError> {
        self.inner
            .execute_stream(ctx, request, RequestType::TextCompletionStream)
            .await
    }

    pub async fn chat_completion_stream_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<ResponseStream, BifrostError> {
        self.inner
            .execute_stream(ctx, request, RequestType::ChatCompletionStream)
            .await
    }

    pub async fn responses_stream_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<ResponseStream, BifrostError> {
        self.inner
            .execute_stream(ctx, request, RequestType::ResponsesStream)
            .await
    }

    pub async fn speech_stream_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<ResponseStream, BifrostError> {
        self.inner
            .execute_stream(ctx, request, RequestType::SpeechStream)
            .await
    }

    pub async fn transcription_stream_request(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
    ) -> Result<ResponseStream, BifrostError> {
        self.inner
            .execute_stream(ctx, request, RequestType::TranscriptionStream)
            .await
    }

    /// Counters of the request-envelope pool.
    pub fn request_pool_stats(&self) -> PoolStats {
        self.inner.requests.stats()
    }

    /// Stops accepting requests, drains every provider queue, joins all
    /// workers, then runs plugin cleanup in reverse order. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("bifrost gateway shutting down");

        let map = self.inner.providers.swap(Arc::new(HashMap::new()));
        let mut handles = Vec::new();
        for runtime in map.values() {
            handles.extend(runtime.workers.lock().unwrap().drain(..));
        }
        // Dropping the map releases the queue senders; workers drain what is
        // left and exit.
        drop(map);
        for handle in handles {
            let _ = handle.await;
        }

        self.inner.pipeline.cleanup_all().await;

        let stats = self.inner.requests.stats();
        if stats.active > 0 {
            warn!(
                active = stats.active,
                "request envelopes still checked out at shutdown"
            );
        }
        info!("bifrost gateway shutdown complete");
    }

    /// Shuts the gateway down when the process receives an interrupt or
    /// terminate signal.
    pub fn shutdown_on_signal(&self) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            gateway.shutdown().await;
        })
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

impl Engine {
    /// Resolves the provider's runtime, preparing it lazily on first touch.
    pub(crate) async fn runtime_for(
        &self,
        provider: &ProviderId,
    ) -> Result<Arc<ProviderRuntime>, BifrostError> {
        if let Some(runtime) = self.providers.load().get(provider) {
            return Ok(runtime.clone());
        }

        let _guard = self.prepare_lock.lock().await;
        // Double-check: another first-touch may have prepared it while we
        // waited on the lock.
        if let Some(runtime) = self.providers.load().get(provider) {
            return Ok(runtime.clone());
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BifrostError::new(
                ErrorKind::Cancelled,
                "gateway is shutting down",
            ));
        }
        let Some(adapter) = self.registry.get(provider) else {
            return Err(BifrostError::new(
                ErrorKind::UnsupportedProvider,
                format!("no adapter registered for provider {provider}"),
            ));
        };
        let config = self
            .worker_shared
            .account
            .config_for_provider(provider)
            .unwrap_or_default();
        info!(provider = %provider, "preparing provider on first use");
        let runtime = self.spawn_runtime(provider.clone(), adapter, config);

        let mut map = self.providers.load().as_ref().clone();
        map.insert(provider.clone(), runtime.clone());
        self.providers.store(Arc::new(map));
        Ok(runtime)
    }

    fn spawn_runtime(
        &self,
        provider: ProviderId,
        adapter: Arc<dyn ProviderAdapter>,
        config: ProviderConfig,
    ) -> Arc<ProviderRuntime> {
        let sizing = config.concurrency_and_buffer_size;
        let (tx, rx) = mpsc::channel(sizing.buffer_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(sizing.concurrency.max(1));
        for _ in 0..sizing.concurrency.max(1) {
            workers.push(tokio::spawn(worker::run(
                self.worker_shared.clone(),
                provider.clone(),
                adapter.clone(),
                config.clone(),
                rx.clone(),
            )));
        }
        Arc::new(ProviderRuntime {
            tx,
            workers: std::sync::Mutex::new(workers),
        })
    }
}
