use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ids::RequestId;

/// Request-scoped context threaded through the dispatch pipeline.
///
/// Carries only semantic values (IDs, the stream-end indicator, plugin tags),
/// never transport types. Plugins store their own values under a namespaced
/// sub-map keyed by plugin name so two plugins can never clobber each other.
///
/// Cancellation and deadline both propagate through this record; everything
/// that suspends on behalf of the request selects against [`RequestContext::done`].
pub struct RequestContext {
    request_id: RequestId,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    stream_end: AtomicBool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    fallback_request_id: Option<RequestId>,
    selected_key_id: Option<String>,
    tags: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            cancel: CancellationToken::new(),
            deadline: None,
            stream_end: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Context with an absolute deadline.
    pub fn with_deadline(deadline: Instant) -> Self {
        let mut ctx = Self::new();
        ctx.deadline = Some(deadline);
        ctx
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn fallback_request_id(&self) -> Option<RequestId> {
        self.inner.lock().unwrap().fallback_request_id
    }

    /// Starts a fallback attempt: a fresh fallback request ID is generated
    /// while the original request ID stays untouched.
    pub fn begin_fallback_attempt(&self) -> RequestId {
        let id = RequestId::new();
        self.inner.lock().unwrap().fallback_request_id = Some(id);
        id
    }

    pub fn selected_key_id(&self) -> Option<String> {
        self.inner.lock().unwrap().selected_key_id.clone()
    }

    pub fn set_selected_key_id(&self, id: impl Into<String>) {
        self.inner.lock().unwrap().selected_key_id = Some(id.into());
    }

    /// True once the final chunk of a stream has been produced.
    pub fn stream_end_reached(&self) -> bool {
        self.stream_end.load(Ordering::Acquire)
    }

    pub fn set_stream_end(&self) {
        self.stream_end.store(true, Ordering::Release);
    }

    /// Reads a plugin tag from the namespaced tag map.
    pub fn tag(&self, plugin: &str, key: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .unwrap()
            .tags
            .get(plugin)
            .and_then(|m| m.get(key))
            .cloned()
    }

    pub fn set_tag(&self, plugin: &str, key: impl Into<String>, value: serde_json::Value) {
        self.inner
            .lock()
            .unwrap()
            .tags
            .entry(plugin.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True if the request was cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        matches!(self.deadline, Some(d) if d <= Instant::now())
    }

    /// Resolves when the request is cancelled or the deadline fires,
    /// whichever happens first. Never resolves for an unbounded live request.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => self.cancel.cancelled().await,
        }
    }

    /// Earliest of the caller deadline and `now + default_timeout`.
    ///
    /// Used per attempt so a provider's own request timeout still applies
    /// when the caller did not set a deadline.
    pub fn effective_deadline(&self, default_timeout: Duration) -> Instant {
        let provider_deadline = Instant::now() + default_timeout;
        match self.deadline {
            Some(d) if d < provider_deadline => d,
            _ => provider_deadline,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
