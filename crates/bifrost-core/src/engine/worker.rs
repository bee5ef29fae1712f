use std::sync::Arc;

use bifrost_common::RequestContext;
use bifrost_model::{
    BifrostError, BifrostRequest, BifrostResponse, ErrorKind, ProviderId, RequestType,
    ResponsePayload,
};
use bifrost_provider::{Account, ChunkStream, Key, KeySelector, ProviderAdapter, ProviderConfig};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::warn;

use crate::plugin::PluginPipeline;
use crate::pool::Pooled;

use super::envelope::{Envelope, Job, StreamReply, UnaryReply};

/// Engine state a worker needs on every dequeue. Kept separate from the
/// engine itself so worker tasks never hold the provider map alive.
pub(crate) struct WorkerShared {
    pub account: Arc<dyn Account>,
    pub key_selector: KeySelector,
    pub pipeline: Arc<PluginPipeline>,
}

/// Workers share one receiver; only the current dequeuer holds the lock.
pub(crate) type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>;

pub(crate) fn cancellation_error(ctx: &RequestContext) -> BifrostError {
    if ctx.cancel_token().is_cancelled() {
        BifrostError::cancelled()
    } else {
        BifrostError::deadline_exceeded()
    }
}

pub(crate) fn stamp_error(
    mut err: BifrostError,
    provider: &ProviderId,
    model: &str,
    request_type: RequestType,
) -> BifrostError {
    if err.extra.provider.is_none() {
        err.extra.provider = Some(provider.clone());
    }
    if err.extra.model_requested.is_none() {
        err.extra.model_requested = Some(model.to_string());
    }
    if err.extra.request_type.is_none() {
        err.extra.request_type = Some(request_type);
    }
    err
}

pub(crate) async fn run(
    shared: Arc<WorkerShared>,
    provider: ProviderId,
    adapter: Arc<dyn ProviderAdapter>,
    config: ProviderConfig,
    rx: SharedReceiver,
) {
    loop {
        // The lock guards only the dequeue; processing runs lock-free so the
        // other workers keep draining.
        let envelope = { rx.lock().await.recv().await };
        let Some(envelope) = envelope else {
            // Queue closed and drained.
            break;
        };
        handle(&shared, &provider, adapter.as_ref(), &config, envelope).await;
    }
}

async fn handle(
    shared: &WorkerShared,
    provider: &ProviderId,
    adapter: &dyn ProviderAdapter,
    config: &ProviderConfig,
    envelope: Envelope,
) {
    let Envelope {
        ctx,
        request,
        request_type,
        job,
    } = envelope;

    // A caller that cancelled while queued never reaches the adapter.
    if ctx.is_cancelled() {
        reply_error(job, request, cancellation_error(&ctx));
        return;
    }

    let keys = match shared.account.keys_for_provider(provider) {
        Ok(keys) => keys,
        Err(err) => {
            let err = stamp_error(
                BifrostError::new(
                    ErrorKind::NoEligibleKey,
                    format!("account has no keys for provider {provider}: {err}"),
                ),
                provider,
                &request.model,
                request_type,
            );
            reply_error(job, request, err);
            return;
        }
    };
    let key = match (shared.key_selector)(provider, &request.model, &keys) {
        Ok(key) => key,
        Err(err) => {
            let err = stamp_error(err, provider, &request.model, request_type);
            reply_error(job, request, err);
            return;
        }
    };
    if let Some(id) = &key.id {
        ctx.set_selected_key_id(id.clone());
    }

    let started = Instant::now();
    let deadline = ctx.effective_deadline(config.network.default_request_timeout);

    match job {
        Job::Unary(reply) => {
            let result = tokio::select! {
                result = call_unary(adapter, &ctx, config, &key, &request, request_type) => result,
                _ = tokio::time::sleep_until(deadline) => Err(BifrostError::deadline_exceeded()),
                _ = ctx.cancel_token().cancelled() => Err(BifrostError::cancelled()),
            };
            let result = match result {
                Ok(mut response) => {
                    response.extra.request_type = Some(request_type);
                    response.extra.provider = provider.clone();
                    response.extra.model_requested = request.model.clone();
                    response.extra.latency = Some(started.elapsed());
                    Ok(response)
                }
                Err(err) => Err(stamp_error(err, provider, &request.model, request_type)),
            };
            // A gone caller drops the request guard straight back to the pool.
            let _ = reply.send(UnaryReply { request, result });
        }
        Job::Stream(reply) => {
            serve_stream(StreamJob {
                shared,
                provider,
                adapter,
                config,
                key,
                ctx,
                request,
                request_type,
                reply,
                started,
                deadline,
            })
            .await;
        }
    }
}

fn reply_error(job: Job, request: Pooled<BifrostRequest>, err: BifrostError) {
    match job {
        Job::Unary(reply) => {
            let _ = reply.send(UnaryReply {
                request,
                result: Err(err),
            });
        }
        Job::Stream(reply) => {
            let _ = reply.send(StreamReply {
                request,
                result: Err(err),
            });
        }
    }
}

async fn call_unary(
    adapter: &dyn ProviderAdapter,
    ctx: &RequestContext,
    config: &ProviderConfig,
    key: &Key,
    request: &BifrostRequest,
    request_type: RequestType,
) -> Result<BifrostResponse, BifrostError> {
    match request_type {
        RequestType::TextCompletion => adapter.text_completion(ctx, config, key, request).await,
        RequestType::ChatCompletion => adapter.chat_completion(ctx, config, key, request).await,
        RequestType::Responses => adapter.responses(ctx, config, key, request).await,
        RequestType::Embedding => adapter.embedding(ctx, config, key, request).await,
        RequestType::Speech => adapter.speech(ctx, config, key, request).await,
        RequestType::Transcription => adapter.transcription(ctx, config, key, request).await,
        _ => Err(BifrostError::invalid_request(
            "streaming request dispatched on the unary path",
        )),
    }
}

async fn call_stream(
    adapter: &dyn ProviderAdapter,
    ctx: &RequestContext,
    config: &ProviderConfig,
    key: &Key,
    request: &BifrostRequest,
    request_type: RequestType,
) -> Result<ChunkStream, BifrostError> {
    match request_type {
        RequestType::TextCompletionStream => {
            adapter.text_completion_stream(ctx, config, key, request).await
        }
        RequestType::ChatCompletionStream => {
            adapter.chat_completion_stream(ctx, config, key, request).await
        }
        RequestType::ResponsesStream => adapter.responses_stream(ctx, config, key, request).await,
        RequestType::SpeechStream => adapter.speech_stream(ctx, config, key, request).await,
        RequestType::TranscriptionStream => {
            adapter.transcription_stream(ctx, config, key, request).await
        }
        _ => Err(BifrostError::invalid_request(
            "unary request dispatched on the streaming path",
        )),
    }
}

struct StreamJob<'a> {
    shared: &'a WorkerShared,
    provider: &'a ProviderId,
    adapter: &'a dyn ProviderAdapter,
    config: &'a ProviderConfig,
    key: Key,
    ctx: Arc<RequestContext>,
    request: Pooled<BifrostRequest>,
    request_type: RequestType,
    reply: oneshot::Sender<StreamReply>,
    started: Instant,
    deadline: Instant,
}

async fn serve_stream(job: StreamJob<'_>) {
    let StreamJob {
        shared,
        provider,
        adapter,
        config,
        key,
        ctx,
        request,
        request_type,
        reply,
        started,
        deadline,
    } = job;

    let opened = tokio::select! {
        result = call_stream(adapter, &ctx, config, &key, &request, request_type) => result,
        _ = tokio::time::sleep_until(deadline) => Err(BifrostError::deadline_exceeded()),
        _ = ctx.cancel_token().cancelled() => Err(BifrostError::cancelled()),
    };
    let mut upstream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            let err = stamp_error(err, provider, &request.model, request_type);
            let _ = reply.send(StreamReply {
                request,
                result: Err(err),
            });
            return;
        }
    };

    // Nothing has been delivered yet, so a failure on the very first item
    // must stay fallback-eligible: pull it before committing the stream.
    let first = tokio::select! {
        item = upstream.next() => item,
        _ = ctx.done() => {
            let err = cancellation_error(&ctx);
            let _ = reply.send(StreamReply { request, result: Err(err) });
            return;
        }
    };
    let pending = match first {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(err)) => {
            let err = stamp_error(err, provider, &request.model, request_type);
            let _ = reply.send(StreamReply {
                request,
                result: Err(err),
            });
            return;
        }
        // An empty upstream still commits; the pump synthesizes the terminal
        // chunk so the caller sees exactly one end-of-stream signal.
        None => None,
    };

    let model_requested = request.model.clone();
    let buffer = config.concurrency_and_buffer_size.buffer_size.max(1);
    let (tx, rx) = mpsc::channel(buffer);
    if reply
        .send(StreamReply {
            request,
            result: Ok(rx),
        })
        .is_err()
    {
        // Caller went away before commit; drop the adapter stream unread.
        return;
    }

    pump(
        shared,
        provider,
        &ctx,
        request_type,
        &model_requested,
        &mut upstream,
        pending,
        &tx,
        started,
    )
    .await;
}

/// Drives adapter chunks through the post-hook chain to the caller.
///
/// Runs one item ahead of delivery: the chunk held back becomes the final
/// chunk once the upstream ends, which is when the stream-end indicator and
/// total latency get stamped onto it.
#[allow(clippy::too_many_arguments)]
async fn pump(
    shared: &WorkerShared,
    provider: &ProviderId,
    ctx: &Arc<RequestContext>,
    request_type: RequestType,
    model_requested: &str,
    upstream: &mut ChunkStream,
    mut pending: Option<BifrostResponse>,
    tx: &mpsc::Sender<Result<BifrostResponse, BifrostError>>,
    started: Instant,
) {
    let mut next_index: u32 = 0;
    loop {
        let item = tokio::select! {
            item = upstream.next() => item,
            // Cancellation mid-stream: close the channel without a terminal
            // item and stop reading the adapter.
            _ = ctx.done() => return,
        };
        match item {
            Some(Ok(chunk)) => {
                if let Some(prev) = pending.take() {
                    if !deliver(
                        shared,
                        provider,
                        ctx,
                        request_type,
                        model_requested,
                        prev,
                        &mut next_index,
                        tx,
                    )
                    .await
                    {
                        return;
                    }
                }
                pending = Some(chunk);
            }
            Some(Err(err)) => {
                // Flush the held chunk, then surface the failure as the
                // terminal item.
                if let Some(prev) = pending.take() {
                    if !deliver(
                        shared,
                        provider,
                        ctx,
                        request_type,
                        model_requested,
                        prev,
                        &mut next_index,
                        tx,
                    )
                    .await
                    {
                        return;
                    }
                }
                let err = stamp_error(err, provider, model_requested, request_type);
                match shared
                    .pipeline
                    .run_post(ctx, shared.pipeline.len(), Err(err))
                    .await
                {
                    Ok(mut converted) => {
                        // A post-hook recovered the failure into content;
                        // deliver it and keep reading.
                        converted.extra.request_type = Some(request_type);
                        converted.extra.provider = provider.clone();
                        converted.extra.model_requested = model_requested.to_string();
                        converted.extra.chunk_index = Some(next_index);
                        next_index += 1;
                        if !send_item(ctx, tx, Ok(converted)).await {
                            return;
                        }
                    }
                    Err(err) => {
                        if err.skip_stream() {
                            continue;
                        }
                        if err.log_error() {
                            warn!(provider = %provider, error = %err, "stream failed mid-flight");
                        }
                        send_item(ctx, tx, Err(err)).await;
                        return;
                    }
                }
            }
            None => {
                // Upstream finished: the held chunk is the final one.
                let mut last = pending.take().unwrap_or_else(|| {
                    BifrostResponse::new(ResponsePayload::empty_for(request_type))
                });
                ctx.set_stream_end();
                last.extra.latency = Some(started.elapsed());
                deliver(
                    shared,
                    provider,
                    ctx,
                    request_type,
                    model_requested,
                    last,
                    &mut next_index,
                    tx,
                )
                .await;
                return;
            }
        }
    }
}

/// Post-hooks then delivery for one chunk. Returns false when the stream
/// must stop (terminal error delivered or caller gone).
#[allow(clippy::too_many_arguments)]
async fn deliver(
    shared: &WorkerShared,
    provider: &ProviderId,
    ctx: &Arc<RequestContext>,
    request_type: RequestType,
    model_requested: &str,
    mut chunk: BifrostResponse,
    next_index: &mut u32,
    tx: &mpsc::Sender<Result<BifrostResponse, BifrostError>>,
) -> bool {
    chunk.extra.request_type = Some(request_type);
    chunk.extra.provider = provider.clone();
    chunk.extra.model_requested = model_requested.to_string();
    chunk.extra.chunk_index = Some(*next_index);
    match shared
        .pipeline
        .run_post(ctx, shared.pipeline.len(), Ok(chunk))
        .await
    {
        Ok(chunk) => {
            *next_index += 1;
            send_item(ctx, tx, Ok(chunk)).await
        }
        Err(err) => {
            if err.skip_stream() {
                // Dropped silently; the index is not consumed.
                return true;
            }
            if err.log_error() {
                warn!(provider = %provider, error = %err, "stream chunk replaced by error");
            }
            send_item(ctx, tx, Err(err)).await;
            false
        }
    }
}

/// Delivery that never outlives the request: a cancelled caller with a full
/// channel must not wedge the worker in `send`.
async fn send_item(
    ctx: &RequestContext,
    tx: &mpsc::Sender<Result<BifrostResponse, BifrostError>>,
    item: Result<BifrostResponse, BifrostError>,
) -> bool {
    tokio::select! {
        sent = tx.send(item) => sent.is_ok(),
        _ = ctx.done() => false,
    }
}
