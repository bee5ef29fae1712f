mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bifrost_common::RequestContext;
use bifrost_core::{Bifrost, BifrostConfig, Plugin, PluginError, PluginResult, QueuePolicy, ShortCircuit};
use bifrost_model::{BifrostError, BifrostRequest, BifrostResponse, ErrorKind, Fallback, ProviderId, RequestType};
use tokio::time::timeout;

use common::{
    MockAdapter, StaticAccount, chat_content, chat_request, key_for_model, sizing, wildcard_key,
};

fn single_provider_gateway(adapter: Arc<MockAdapter>) -> Bifrost {
    let account = StaticAccount::new()
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o-mini", 1.0)])
        .with_config("openai", sizing(2, 10));
    Bifrost::init(BifrostConfig::new(Arc::new(account)).with_adapter(adapter)).unwrap()
}

#[tokio::test]
async fn happy_path_stamps_extra_fields_and_balances_the_pool() {
    let adapter = Arc::new(MockAdapter::new("openai").with_delay(Duration::from_millis(5)));
    let gateway = single_provider_gateway(adapter.clone());

    let ctx = Arc::new(RequestContext::new());
    let response = gateway
        .chat_completion_request(ctx.clone(), chat_request("openai", "gpt-4o-mini"))
        .await
        .unwrap();

    assert_eq!(adapter.calls(), 1);
    assert_eq!(chat_content(&response).as_deref(), Some("ok"));
    assert_eq!(response.extra.provider, ProviderId::from("openai"));
    assert_eq!(response.extra.model_requested, "gpt-4o-mini");
    assert_eq!(response.extra.request_type, Some(RequestType::ChatCompletion));
    assert!(response.extra.latency.unwrap() > Duration::ZERO);
    assert_eq!(ctx.selected_key_id().as_deref(), Some("k1"));

    let stats = gateway.request_pool_stats();
    assert_eq!(stats.acquires, stats.releases);
    assert_eq!(stats.active, 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn weighted_selection_converges_to_the_weight_ratio() {
    let account = StaticAccount::new()
        .with_provider(
            "openai",
            vec![wildcard_key("heavy", 3.0), wildcard_key("light", 1.0)],
        )
        .with_config("openai", sizing(2, 16));
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account)).with_adapter(Arc::new(MockAdapter::new("openai"))),
    )
    .unwrap();

    let n = 10_000usize;
    let mut heavy = 0usize;
    for _ in 0..n {
        let ctx = Arc::new(RequestContext::new());
        gateway
            .chat_completion_request(ctx.clone(), chat_request("openai", "gpt-4o-mini"))
            .await
            .unwrap();
        if ctx.selected_key_id().as_deref() == Some("heavy") {
            heavy += 1;
        }
    }
    let ratio = heavy as f64 / n as f64;
    assert!((ratio - 0.75).abs() < 0.02, "observed ratio {ratio}");

    gateway.shutdown().await;
}

/// Pre-hook cache: short-circuits with a synthetic response; the plugin
/// registered before it still runs its post-hook.
struct CachePlugin;

#[async_trait]
impl Plugin for CachePlugin {
    fn name(&self) -> &str {
        "cache"
    }

    async fn pre_hook(
        &self,
        _ctx: &RequestContext,
        _req: &mut BifrostRequest,
    ) -> Result<Option<ShortCircuit>, PluginError> {
        Ok(Some(ShortCircuit::response(BifrostResponse::chat_message(
            "cached",
        ))))
    }
}

/// Records every hook invocation.
struct JournalPlugin {
    name: String,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Plugin for JournalPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pre_hook(
        &self,
        _ctx: &RequestContext,
        _req: &mut BifrostRequest,
    ) -> Result<Option<ShortCircuit>, PluginError> {
        self.journal.lock().unwrap().push(format!("pre:{}", self.name));
        Ok(None)
    }

    async fn post_hook(
        &self,
        _ctx: &RequestContext,
        result: PluginResult,
    ) -> Result<PluginResult, PluginError> {
        self.journal.lock().unwrap().push(format!("post:{}", self.name));
        Ok(result)
    }

    async fn cleanup(&self) -> Result<(), PluginError> {
        self.journal.lock().unwrap().push(format!("cleanup:{}", self.name));
        Ok(())
    }
}

#[tokio::test]
async fn short_circuit_skips_the_adapter_and_unwinds_the_prefix() {
    let adapter = Arc::new(MockAdapter::new("openai"));
    let journal = Arc::new(Mutex::new(Vec::new()));
    let account = StaticAccount::new()
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o-mini", 1.0)]);
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(adapter.clone())
            .with_plugin(Arc::new(JournalPlugin {
                name: "audit".into(),
                journal: journal.clone(),
            }))
            .with_plugin(Arc::new(CachePlugin)),
    )
    .unwrap();

    let ctx = Arc::new(RequestContext::new());
    let response = gateway
        .chat_completion_request(ctx, chat_request("openai", "gpt-4o-mini"))
        .await
        .unwrap();

    assert_eq!(adapter.calls(), 0);
    assert_eq!(chat_content(&response).as_deref(), Some("cached"));
    // The audit plugin ran both hooks; the cache plugin's own post-hook is
    // skipped.
    assert_eq!(*journal.lock().unwrap(), vec!["pre:audit", "post:audit"]);

    gateway.shutdown().await;
}

fn two_provider_gateway(
    primary: Arc<MockAdapter>,
    secondary: Arc<MockAdapter>,
) -> Bifrost {
    let account = StaticAccount::new()
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o-mini", 1.0)])
        .with_provider("anthropic", vec![key_for_model("k2", "claude-3", 1.0)]);
    Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(primary)
            .with_adapter(secondary),
    )
    .unwrap()
}

#[tokio::test]
async fn fallback_recovers_from_a_server_error() {
    let primary = Arc::new(MockAdapter::failing("openai", 502));
    let secondary = Arc::new(MockAdapter::new("anthropic").with_unary(|_| {
        Ok(BifrostResponse::chat_message("from anthropic"))
    }));
    let gateway = two_provider_gateway(primary.clone(), secondary.clone());

    let ctx = Arc::new(RequestContext::new());
    let request = chat_request("openai", "gpt-4o-mini")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let response = gateway.chat_completion_request(ctx.clone(), request).await.unwrap();

    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(chat_content(&response).as_deref(), Some("from anthropic"));
    assert_eq!(response.extra.provider, ProviderId::from("anthropic"));
    assert_eq!(response.extra.model_requested, "claude-3");
    assert!(ctx.fallback_request_id().is_some());

    gateway.shutdown().await;
}

#[tokio::test]
async fn fallback_is_inhibited_when_the_error_forbids_it() {
    let primary = Arc::new(MockAdapter::new("openai").with_unary(|_| {
        Err(BifrostError::provider_error(400, "bad request").with_allow_fallbacks(false))
    }));
    let secondary = Arc::new(MockAdapter::new("anthropic"));
    let gateway = two_provider_gateway(primary.clone(), secondary.clone());

    let request = chat_request("openai", "gpt-4o-mini")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let err = gateway
        .chat_completion_request(Arc::new(RequestContext::new()), request)
        .await
        .unwrap_err();

    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
    assert_eq!(err.status_code, Some(400));

    gateway.shutdown().await;
}

#[tokio::test]
async fn exhausted_fallbacks_surface_the_last_error() {
    let primary = Arc::new(MockAdapter::failing("openai", 502));
    let secondary = Arc::new(MockAdapter::failing("anthropic", 503));
    let gateway = two_provider_gateway(primary.clone(), secondary.clone());

    let request = chat_request("openai", "gpt-4o-mini")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let err = gateway
        .chat_completion_request(Arc::new(RequestContext::new()), request)
        .await
        .unwrap_err();

    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
    // Last error observed wins.
    assert_eq!(err.status_code, Some(503));
    assert_eq!(err.extra.provider, Some(ProviderId::from("anthropic")));

    gateway.shutdown().await;
}

#[tokio::test]
async fn no_eligible_key_falls_through_to_the_next_provider() {
    let primary = Arc::new(MockAdapter::new("openai"));
    let secondary = Arc::new(MockAdapter::new("anthropic"));
    let account = StaticAccount::new()
        // Key only supports another model, so selection fails.
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o", 1.0)])
        .with_provider("anthropic", vec![key_for_model("k2", "claude-3", 1.0)]);
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(primary.clone())
            .with_adapter(secondary.clone()),
    )
    .unwrap();

    let request = chat_request("openai", "gpt-4o-mini")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let response = gateway
        .chat_completion_request(Arc::new(RequestContext::new()), request)
        .await
        .unwrap();

    assert_eq!(primary.calls(), 0);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(response.extra.provider, ProviderId::from("anthropic"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn lazy_provider_is_prepared_on_first_use() {
    let eager = Arc::new(MockAdapter::new("openai"));
    let lazy = Arc::new(MockAdapter::new("mistral"));
    let account = StaticAccount::new()
        .with_provider("openai", vec![wildcard_key("k1", 1.0)])
        .with_lazy_provider("mistral", vec![wildcard_key("k2", 1.0)]);
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(eager)
            .with_adapter(lazy.clone()),
    )
    .unwrap();

    let response = gateway
        .chat_completion_request(
            Arc::new(RequestContext::new()),
            chat_request("mistral", "mistral-large"),
        )
        .await
        .unwrap();

    assert_eq!(lazy.calls(), 1);
    assert_eq!(response.extra.provider, ProviderId::from("mistral"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn unknown_provider_is_fallback_eligible() {
    let secondary = Arc::new(MockAdapter::new("anthropic"));
    let account = StaticAccount::new()
        .with_provider("anthropic", vec![key_for_model("k2", "claude-3", 1.0)]);
    let gateway = Bifrost::init(BifrostConfig::new(Arc::new(account)).with_adapter(secondary.clone()))
        .unwrap();

    let request = chat_request("nonexistent", "some-model")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let response = gateway
        .chat_completion_request(Arc::new(RequestContext::new()), request)
        .await
        .unwrap();
    assert_eq!(secondary.calls(), 1);
    assert_eq!(response.extra.provider, ProviderId::from("anthropic"));

    // Without a fallback the routing failure surfaces directly.
    let err = gateway
        .chat_completion_request(
            Arc::new(RequestContext::new()),
            chat_request("nonexistent", "some-model"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedProvider);

    gateway.shutdown().await;
}

/// Converts any error into one that forbids fallbacks; the most recent
/// hook transformation decides.
struct FallbackGate;

#[async_trait]
impl Plugin for FallbackGate {
    fn name(&self) -> &str {
        "fallback-gate"
    }

    async fn post_hook(
        &self,
        _ctx: &RequestContext,
        result: PluginResult,
    ) -> Result<PluginResult, PluginError> {
        Ok(result.map_err(|err| err.with_allow_fallbacks(false)))
    }
}

#[tokio::test]
async fn post_hook_can_veto_fallbacks() {
    let primary = Arc::new(MockAdapter::failing("openai", 502));
    let secondary = Arc::new(MockAdapter::new("anthropic"));
    let account = StaticAccount::new()
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o-mini", 1.0)])
        .with_provider("anthropic", vec![key_for_model("k2", "claude-3", 1.0)]);
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(primary.clone())
            .with_adapter(secondary.clone())
            .with_plugin(Arc::new(FallbackGate)),
    )
    .unwrap();

    let request = chat_request("openai", "gpt-4o-mini")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let err = gateway
        .chat_completion_request(Arc::new(RequestContext::new()), request)
        .await
        .unwrap_err();

    assert_eq!(err.status_code, Some(502));
    assert_eq!(secondary.calls(), 0);

    gateway.shutdown().await;
}

/// A post-hook whose own failure must abort the pipeline terminally.
struct BrokenPostHook;

#[async_trait]
impl Plugin for BrokenPostHook {
    fn name(&self) -> &str {
        "broken"
    }

    async fn post_hook(
        &self,
        _ctx: &RequestContext,
        _result: PluginResult,
    ) -> Result<PluginResult, PluginError> {
        Err(PluginError::new("post-hook exploded"))
    }
}

#[tokio::test]
async fn pipeline_error_is_terminal_despite_fallbacks() {
    let primary = Arc::new(MockAdapter::new("openai"));
    let secondary = Arc::new(MockAdapter::new("anthropic"));
    let account = StaticAccount::new()
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o-mini", 1.0)])
        .with_provider("anthropic", vec![key_for_model("k2", "claude-3", 1.0)]);
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(primary.clone())
            .with_adapter(secondary.clone())
            .with_plugin(Arc::new(BrokenPostHook)),
    )
    .unwrap();

    let request = chat_request("openai", "gpt-4o-mini")
        .with_fallbacks(vec![Fallback::new("anthropic", "claude-3")]);
    let err = gateway
        .chat_completion_request(Arc::new(RequestContext::new()), request)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::PluginPipeline);
    assert_eq!(secondary.calls(), 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn cancellation_before_dispatch_never_reaches_the_adapter() {
    let adapter = Arc::new(MockAdapter::new("openai"));
    let gateway = single_provider_gateway(adapter.clone());

    let ctx = Arc::new(RequestContext::new());
    ctx.cancel();
    let err = gateway
        .chat_completion_request(ctx, chat_request("openai", "gpt-4o-mini"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(adapter.calls(), 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn cancellation_while_queued_skips_the_adapter_call() {
    let adapter = Arc::new(MockAdapter::new("openai").with_delay(Duration::from_millis(100)));
    let account = StaticAccount::new()
        .with_provider("openai", vec![wildcard_key("k1", 1.0)])
        .with_config("openai", sizing(1, 10));
    let gateway =
        Bifrost::init(BifrostConfig::new(Arc::new(account)).with_adapter(adapter.clone())).unwrap();

    // Occupies the single worker.
    let first = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .chat_completion_request(
                    Arc::new(RequestContext::new()),
                    chat_request("openai", "gpt-4o-mini"),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Queued behind the first, then cancelled before dequeue.
    let ctx = Arc::new(RequestContext::new());
    let second = {
        let gateway = gateway.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            gateway
                .chat_completion_request(ctx, chat_request("openai", "gpt-4o-mini"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.cancel();

    let second_result = timeout(Duration::from_secs(1), second).await.unwrap().unwrap();
    assert_eq!(second_result.unwrap_err().kind, ErrorKind::Cancelled);
    assert!(timeout(Duration::from_secs(1), first).await.unwrap().unwrap().is_ok());

    // The worker observed the cancellation at dequeue and skipped the call.
    assert_eq!(adapter.calls(), 1);

    gateway.shutdown().await;
    let stats = gateway.request_pool_stats();
    assert_eq!(stats.acquires, stats.releases);
}

#[tokio::test]
async fn drop_excess_policy_sheds_load_with_queue_full() {
    let adapter = Arc::new(MockAdapter::new("openai").with_delay(Duration::from_millis(150)));
    let account = StaticAccount::new()
        .with_provider("openai", vec![wildcard_key("k1", 1.0)])
        .with_config("openai", sizing(1, 1));
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(adapter.clone())
            .with_queue_policy(QueuePolicy::DropExcess),
    )
    .unwrap();

    let spawn_request = |gateway: Bifrost| {
        tokio::spawn(async move {
            gateway
                .chat_completion_request(
                    Arc::new(RequestContext::new()),
                    chat_request("openai", "gpt-4o-mini"),
                )
                .await
        })
    };

    // One in flight, one filling the buffer slot, then the queue is full.
    let first = spawn_request(gateway.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = spawn_request(gateway.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = gateway
        .chat_completion_request(
            Arc::new(RequestContext::new()),
            chat_request("openai", "gpt-4o-mini"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);
    assert_eq!(err.status_code, Some(503));

    assert!(timeout(Duration::from_secs(1), first).await.unwrap().unwrap().is_ok());
    assert!(timeout(Duration::from_secs(1), second).await.unwrap().unwrap().is_ok());

    gateway.shutdown().await;
}

#[tokio::test]
async fn invalid_payload_is_rejected_before_pooling() {
    let adapter = Arc::new(MockAdapter::new("openai"));
    let gateway = single_provider_gateway(adapter.clone());

    // Chat payload sent through the embedding operation.
    let err = gateway
        .embedding_request(
            Arc::new(RequestContext::new()),
            chat_request("openai", "gpt-4o-mini"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(adapter.calls(), 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn caller_deadline_beats_a_slow_adapter() {
    let adapter = Arc::new(MockAdapter::new("openai").with_delay(Duration::from_secs(5)));
    let gateway = single_provider_gateway(adapter.clone());

    let ctx = Arc::new(RequestContext::with_timeout(Duration::from_millis(50)));
    let err = timeout(
        Duration::from_secs(1),
        gateway.chat_completion_request(ctx, chat_request("openai", "gpt-4o-mini")),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DeadlineExceeded);

    gateway.shutdown().await;
    let stats = gateway.request_pool_stats();
    assert_eq!(stats.acquires, stats.releases);
}

#[tokio::test]
async fn every_unary_operation_dispatches_to_its_adapter_method() {
    use bifrost_model::{
        EmbeddingInput, RequestInput, ResponsesInput, SpeechInput, TextCompletionInput,
        TranscriptionInput,
    };

    let adapter = Arc::new(MockAdapter::new("openai"));
    let account = StaticAccount::new().with_provider("openai", vec![wildcard_key("k1", 1.0)]);
    let gateway =
        Bifrost::init(BifrostConfig::new(Arc::new(account)).with_adapter(adapter.clone())).unwrap();

    let inputs = [
        RequestInput::TextCompletion(TextCompletionInput {
            prompt: "once upon".into(),
        }),
        RequestInput::Responses(ResponsesInput::default()),
        RequestInput::Embedding(EmbeddingInput {
            texts: vec!["hi".into()],
        }),
        RequestInput::Speech(SpeechInput {
            input: "hello".into(),
            voice: "alloy".into(),
            format: None,
        }),
        RequestInput::Transcription(TranscriptionInput::default()),
    ];
    for input in inputs {
        let request = BifrostRequest::new("openai", "gpt-4o-mini", input.clone());
        let ctx = Arc::new(RequestContext::new());
        let result = match input {
            RequestInput::TextCompletion(_) => gateway.text_completion_request(ctx, request).await,
            RequestInput::Responses(_) => gateway.responses_request(ctx, request).await,
            RequestInput::Embedding(_) => gateway.embedding_request(ctx, request).await,
            RequestInput::Speech(_) => gateway.speech_request(ctx, request).await,
            RequestInput::Transcription(_) => gateway.transcription_request(ctx, request).await,
            RequestInput::ChatCompletion(_) => unreachable!(),
        };
        result.unwrap();
    }
    assert_eq!(adapter.calls(), 5);

    gateway.shutdown().await;
}

#[tokio::test]
async fn shutdown_runs_cleanup_in_reverse_and_rejects_new_requests() {
    let adapter = Arc::new(MockAdapter::new("openai"));
    let journal = Arc::new(Mutex::new(Vec::new()));
    let account = StaticAccount::new()
        .with_provider("openai", vec![key_for_model("k1", "gpt-4o-mini", 1.0)]);
    let gateway = Bifrost::init(
        BifrostConfig::new(Arc::new(account))
            .with_adapter(adapter)
            .with_plugin(Arc::new(JournalPlugin {
                name: "first".into(),
                journal: journal.clone(),
            }))
            .with_plugin(Arc::new(JournalPlugin {
                name: "second".into(),
                journal: journal.clone(),
            })),
    )
    .unwrap();

    gateway
        .chat_completion_request(
            Arc::new(RequestContext::new()),
            chat_request("openai", "gpt-4o-mini"),
        )
        .await
        .unwrap();

    gateway.shutdown().await;

    let entries = journal.lock().unwrap().clone();
    assert_eq!(
        entries,
        vec![
            "pre:first",
            "pre:second",
            "post:second",
            "post:first",
            "cleanup:second",
            "cleanup:first"
        ]
    );

    let err = gateway
        .chat_completion_request(
            Arc::new(RequestContext::new()),
            chat_request("openai", "gpt-4o-mini"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.message, "gateway is shutting down");

    let stats = gateway.request_pool_stats();
    assert_eq!(stats.active, 0);
}
