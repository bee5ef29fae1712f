use std::sync::Arc;
use std::sync::atomic::Ordering;

use bifrost_common::RequestContext;
use bifrost_model::{BifrostError, BifrostRequest, BifrostResponse, ErrorKind, RequestType};
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::sync::{mpsc, oneshot};

use crate::config::QueuePolicy;
use crate::plugin::{PrePhase, ShortCircuit};
use crate::pool::Pooled;

use super::envelope::{Envelope, Job, ResponseStream, StreamReply, UnaryReply};
use super::worker::{cancellation_error, stamp_error};
use super::{Engine, ProviderRuntime};

enum EnqueueOutcome {
    Enqueued,
    Full(Pooled<BifrostRequest>),
    Closed(Pooled<BifrostRequest>),
    Cancelled,
}

fn queue_closed() -> BifrostError {
    BifrostError::new(ErrorKind::Cancelled, "gateway is shutting down")
}

impl Engine {
    /// The shared unary skeleton: pool, route, pre-hooks, enqueue, await,
    /// post-hooks, then the fallback loop over the request's fallback list.
    pub(crate) async fn execute_unary(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
        request_type: RequestType,
    ) -> Result<BifrostResponse, BifrostError> {
        self.validate(&request, request_type)?;
        if ctx.is_cancelled() {
            return Err(cancellation_error(&ctx));
        }

        let mut pooled = self.requests.acquire();
        *pooled = request;
        let fallbacks = pooled.fallbacks.clone();

        let (mut slot, mut result) = self.attempt_unary(&ctx, pooled, request_type).await;
        if matches!(&result, Err(err) if err.fallback_allowed()) {
            for fallback in &fallbacks {
                let Some(mut pooled) = slot.take() else {
                    break;
                };
                ctx.begin_fallback_attempt();
                pooled.provider = fallback.provider.clone();
                pooled.model = fallback.model.clone();

                let (next_slot, next_result) = self.attempt_unary(&ctx, pooled, request_type).await;
                slot = next_slot;
                let exhausted = match &next_result {
                    Ok(_) => true,
                    Err(err) => !err.fallback_allowed(),
                };
                result = next_result;
                if exhausted {
                    break;
                }
            }
        }
        // The envelope goes back to the pool only now, after the final hook
        // of the last attempt.
        drop(slot);
        result
    }

    async fn attempt_unary(
        &self,
        ctx: &Arc<RequestContext>,
        mut request: Pooled<BifrostRequest>,
        request_type: RequestType,
    ) -> (
        Option<Pooled<BifrostRequest>>,
        Result<BifrostResponse, BifrostError>,
    ) {
        let provider = request.provider.clone();
        let model = request.model.clone();

        let runtime = match self.runtime_for(&provider).await {
            Ok(runtime) => runtime,
            Err(err) => {
                return (
                    Some(request),
                    Err(stamp_error(err, &provider, &model, request_type)),
                );
            }
        };

        match self.pipeline.run_pre(ctx, &mut request).await {
            Ok(PrePhase::Continue) => {}
            Ok(PrePhase::ShortCircuited {
                index,
                short_circuit,
            }) => {
                let result = self.finish_short_circuit(ctx, index, short_circuit).await;
                return (Some(request), result);
            }
            Err(err) => return (Some(request), Err(err)),
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            ctx: ctx.clone(),
            request,
            request_type,
            job: Job::Unary(reply_tx),
        };
        match self.enqueue(&runtime, envelope).await {
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::Full(request) => {
                let err = BifrostError::queue_full(&provider);
                return (
                    Some(request),
                    Err(stamp_error(err, &provider, &model, request_type)),
                );
            }
            EnqueueOutcome::Closed(request) => {
                return (Some(request), Err(queue_closed()));
            }
            EnqueueOutcome::Cancelled => {
                return (None, Err(cancellation_error(ctx)));
            }
        }

        let reply = tokio::select! {
            reply = reply_rx => match reply {
                Ok(reply) => reply,
                Err(_) => {
                    return (
                        None,
                        Err(BifrostError::transport("provider worker terminated before replying")),
                    );
                }
            },
            // The worker observes the same cancellation and releases the
            // envelope on its side.
            _ = ctx.done() => return (None, Err(cancellation_error(ctx))),
        };

        let UnaryReply { request, result } = reply;
        let result = self.pipeline.run_post(ctx, self.pipeline.len(), result).await;
        (
            Some(request),
            result.map_err(|err| stamp_error(err, &provider, &model, request_type)),
        )
    }

    /// Streaming variant: same steps up to the reply, but the reply hands
    /// over a chunk channel and fallbacks stop at the commit point.
    pub(crate) async fn execute_stream(
        &self,
        ctx: Arc<RequestContext>,
        request: BifrostRequest,
        request_type: RequestType,
    ) -> Result<ResponseStream, BifrostError> {
        self.validate(&request, request_type)?;
        if ctx.is_cancelled() {
            return Err(cancellation_error(&ctx));
        }

        let mut pooled = self.requests.acquire();
        *pooled = request;
        let fallbacks = pooled.fallbacks.clone();

        let (mut slot, mut result) = self.attempt_stream(&ctx, pooled, request_type).await;
        if matches!(&result, Err(err) if err.fallback_allowed()) {
            for fallback in &fallbacks {
                let Some(mut pooled) = slot.take() else {
                    break;
                };
                ctx.begin_fallback_attempt();
                pooled.provider = fallback.provider.clone();
                pooled.model = fallback.model.clone();

                let (next_slot, next_result) = self.attempt_stream(&ctx, pooled, request_type).await;
                slot = next_slot;
                let exhausted = match &next_result {
                    Ok(_) => true,
                    Err(err) => !err.fallback_allowed(),
                };
                result = next_result;
                if exhausted {
                    break;
                }
            }
        }
        drop(slot);
        result
    }

    async fn attempt_stream(
        &self,
        ctx: &Arc<RequestContext>,
        mut request: Pooled<BifrostRequest>,
        request_type: RequestType,
    ) -> (
        Option<Pooled<BifrostRequest>>,
        Result<ResponseStream, BifrostError>,
    ) {
        let provider = request.provider.clone();
        let model = request.model.clone();

        let runtime = match self.runtime_for(&provider).await {
            Ok(runtime) => runtime,
            Err(err) => {
                return (
                    Some(request),
                    Err(stamp_error(err, &provider, &model, request_type)),
                );
            }
        };

        match self.pipeline.run_pre(ctx, &mut request).await {
            Ok(PrePhase::Continue) => {}
            Ok(PrePhase::ShortCircuited {
                index,
                short_circuit,
            }) => {
                let result = self
                    .finish_stream_short_circuit(ctx, index, short_circuit, request_type)
                    .await;
                return (Some(request), result);
            }
            Err(err) => return (Some(request), Err(err)),
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            ctx: ctx.clone(),
            request,
            request_type,
            job: Job::Stream(reply_tx),
        };
        match self.enqueue(&runtime, envelope).await {
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::Full(request) => {
                let err = BifrostError::queue_full(&provider);
                return (
                    Some(request),
                    Err(stamp_error(err, &provider, &model, request_type)),
                );
            }
            EnqueueOutcome::Closed(request) => {
                return (Some(request), Err(queue_closed()));
            }
            EnqueueOutcome::Cancelled => {
                return (None, Err(cancellation_error(ctx)));
            }
        }

        let reply = tokio::select! {
            reply = reply_rx => match reply {
                Ok(reply) => reply,
                Err(_) => {
                    return (
                        None,
                        Err(BifrostError::transport("provider worker terminated before replying")),
                    );
                }
            },
            _ = ctx.done() => return (None, Err(cancellation_error(ctx))),
        };

        let StreamReply { request, result } = reply;
        match result {
            // Committed: chunks flow through the worker-side pump from here.
            Ok(stream) => (Some(request), Ok(stream)),
            // Bootstrap failure, still fallback territory. Post-hooks may
            // transform it, or recover it into content, which becomes a
            // one-chunk stream.
            Err(err) => {
                let unwound = self.pipeline.run_post(ctx, self.pipeline.len(), Err(err)).await;
                match unwound {
                    Ok(mut chunk) => {
                        ctx.set_stream_end();
                        chunk.extra.request_type = Some(request_type);
                        chunk.extra.chunk_index = Some(0);
                        (Some(request), Ok(single_chunk_stream(Ok(chunk))))
                    }
                    Err(err) => (
                        Some(request),
                        Err(stamp_error(err, &provider, &model, request_type)),
                    ),
                }
            }
        }
    }

    /// A short-circuited stream request: a synthetic response becomes a
    /// one-chunk stream whose only chunk is also the final one.
    async fn finish_stream_short_circuit(
        &self,
        ctx: &Arc<RequestContext>,
        index: usize,
        short_circuit: ShortCircuit,
        request_type: RequestType,
    ) -> Result<ResponseStream, BifrostError> {
        let (mut result, allow_post_hooks) = match short_circuit {
            ShortCircuit::Response {
                response,
                allow_post_hooks,
            } => (Ok(response), allow_post_hooks),
            ShortCircuit::Error {
                error,
                allow_post_hooks,
            } => (Err(error), allow_post_hooks),
        };
        if let Ok(chunk) = &mut result {
            // The indicator must be visible to the post-hooks that run on
            // this final chunk.
            ctx.set_stream_end();
            chunk.extra.request_type = Some(request_type);
            chunk.extra.chunk_index = Some(0);
        }
        let result = if allow_post_hooks {
            self.pipeline.run_post(ctx, index, result).await
        } else {
            result
        };
        match result {
            Ok(chunk) => Ok(single_chunk_stream(Ok(chunk))),
            Err(err) => Err(err),
        }
    }

    async fn finish_short_circuit(
        &self,
        ctx: &Arc<RequestContext>,
        index: usize,
        short_circuit: ShortCircuit,
    ) -> Result<BifrostResponse, BifrostError> {
        let (result, allow_post_hooks) = match short_circuit {
            ShortCircuit::Response {
                response,
                allow_post_hooks,
            } => (Ok(response), allow_post_hooks),
            ShortCircuit::Error {
                error,
                allow_post_hooks,
            } => (Err(error), allow_post_hooks),
        };
        if !allow_post_hooks {
            return result;
        }
        // Post-hooks of the plugins preceding the short-circuiter, in
        // reverse: the symmetric prefix.
        self.pipeline.run_post(ctx, index, result).await
    }

    async fn enqueue(&self, runtime: &ProviderRuntime, envelope: Envelope) -> EnqueueOutcome {
        match self.queue_policy {
            QueuePolicy::DropExcess => match runtime.tx.try_send(envelope) {
                Ok(()) => EnqueueOutcome::Enqueued,
                Err(TrySendError::Full(envelope)) => EnqueueOutcome::Full(envelope.request),
                Err(TrySendError::Closed(envelope)) => EnqueueOutcome::Closed(envelope.request),
            },
            QueuePolicy::Wait => {
                let ctx = envelope.ctx.clone();
                tokio::select! {
                    sent = runtime.tx.send(envelope) => match sent {
                        Ok(()) => EnqueueOutcome::Enqueued,
                        Err(SendError(envelope)) => EnqueueOutcome::Closed(envelope.request),
                    },
                    _ = ctx.done() => EnqueueOutcome::Cancelled,
                }
            }
        }
    }

    fn validate(
        &self,
        request: &BifrostRequest,
        request_type: RequestType,
    ) -> Result<(), BifrostError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(queue_closed());
        }
        if request.provider.is_empty() {
            return Err(BifrostError::invalid_request("provider is required"));
        }
        if request.model.is_empty() {
            return Err(BifrostError::invalid_request("model is required"));
        }
        if !request.input.matches(request_type) {
            return Err(BifrostError::invalid_request(format!(
                "payload does not match request type {}",
                request_type.as_str()
            )));
        }
        Ok(())
    }
}

fn single_chunk_stream(item: Result<BifrostResponse, BifrostError>) -> ResponseStream {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 guarantees room for the only item.
    let _ = tx.try_send(item);
    rx
}
