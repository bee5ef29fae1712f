use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bifrost_common::RequestContext;
use bifrost_model::{BifrostError, BifrostRequest, BifrostResponse};
use tracing::warn;

/// The (response, error) pair every post-hook transforms. Exactly one side
/// is populated at any point in the chain.
pub type PluginResult = Result<BifrostResponse, BifrostError>;

/// Failure of a hook itself, as opposed to an error *result* a hook returns.
/// Aborts the pipeline terminally.
#[derive(Debug)]
pub struct PluginError {
    message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for PluginError {}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// A pre-hook outcome that bypasses the provider call.
///
/// `allow_post_hooks` is the short-circuiter's choice of whether the
/// symmetric post-phase still runs for the plugins that preceded it.
#[derive(Debug)]
pub enum ShortCircuit {
    Response {
        response: BifrostResponse,
        allow_post_hooks: bool,
    },
    Error {
        error: BifrostError,
        allow_post_hooks: bool,
    },
}

impl ShortCircuit {
    pub fn response(response: BifrostResponse) -> Self {
        ShortCircuit::Response {
            response,
            allow_post_hooks: true,
        }
    }

    pub fn error(error: BifrostError) -> Self {
        ShortCircuit::Error {
            error,
            allow_post_hooks: true,
        }
    }
}

/// User-supplied pre/post hooks executed around every provider call.
///
/// Both hooks default to pass-through so a plugin implements only the side
/// it cares about.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// May rewrite the request in place, or short-circuit the provider call.
    async fn pre_hook(
        &self,
        _ctx: &RequestContext,
        _req: &mut BifrostRequest,
    ) -> Result<Option<ShortCircuit>, PluginError> {
        Ok(None)
    }

    /// May transform the (response, error) pair, including converting one
    /// into the other.
    async fn post_hook(
        &self,
        _ctx: &RequestContext,
        result: PluginResult,
    ) -> Result<PluginResult, PluginError> {
        Ok(result)
    }

    /// Best-effort teardown at gateway shutdown.
    async fn cleanup(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Outcome of the pre-phase.
#[derive(Debug)]
pub enum PrePhase {
    Continue,
    /// `index` is the position of the short-circuiting plugin; its own
    /// post-hook does not run.
    ShortCircuited {
        index: usize,
        short_circuit: ShortCircuit,
    },
}

/// The configured, ordered plugin chain. Immutable after init.
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginPipeline {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs pre-hooks in order. Stops at the first short-circuit; a hook's
    /// own failure aborts with a terminal pipeline error.
    pub async fn run_pre(
        &self,
        ctx: &RequestContext,
        req: &mut BifrostRequest,
    ) -> Result<PrePhase, BifrostError> {
        for (index, plugin) in self.plugins.iter().enumerate() {
            match plugin.pre_hook(ctx, req).await {
                Ok(None) => {}
                Ok(Some(short_circuit)) => {
                    return Ok(PrePhase::ShortCircuited {
                        index,
                        short_circuit,
                    });
                }
                Err(err) => return Err(BifrostError::pipeline(plugin.name(), err)),
            }
        }
        Ok(PrePhase::Continue)
    }

    /// Runs the post-hooks of the first `count` plugins in reverse order.
    ///
    /// `count == len()` is the full unwind after a provider call;
    /// `count == i` is the symmetric prefix when plugin `i` short-circuited,
    /// so exactly the plugins whose pre-hooks completed get to tear down.
    pub async fn run_post(
        &self,
        ctx: &RequestContext,
        count: usize,
        mut result: PluginResult,
    ) -> PluginResult {
        for plugin in self.plugins[..count.min(self.plugins.len())].iter().rev() {
            match plugin.post_hook(ctx, result).await {
                Ok(next) => result = next,
                Err(err) => return Err(BifrostError::pipeline(plugin.name(), err)),
            }
        }
        result
    }

    /// Cleanup in reverse registration order; failures are logged and never
    /// block shutdown.
    pub async fn cleanup_all(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(err) = plugin.cleanup().await {
                warn!(plugin = plugin.name(), error = %err, "plugin cleanup failed");
            }
        }
    }
}
