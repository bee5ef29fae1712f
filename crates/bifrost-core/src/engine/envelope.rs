use std::sync::Arc;

use bifrost_common::RequestContext;
use bifrost_model::{BifrostError, BifrostRequest, BifrostResponse, RequestType};
use tokio::sync::{mpsc, oneshot};

use crate::pool::Pooled;

/// Channel delivering stream chunks to the caller. The stream terminates
/// with either a final chunk (stream-end indicator set in the context) or
/// one `Err` item; cancellation closes the channel without a terminal item.
pub type ResponseStream = mpsc::Receiver<Result<BifrostResponse, BifrostError>>;

/// Reply for a unary call. The pooled request rides back with the outcome
/// so exactly one party ends up releasing it, on every path.
pub(crate) struct UnaryReply {
    pub request: Pooled<BifrostRequest>,
    pub result: Result<BifrostResponse, BifrostError>,
}

/// Reply for a streaming call: the chunk receiver once the stream commits,
/// or the bootstrap error while fallbacks are still possible.
pub(crate) struct StreamReply {
    pub request: Pooled<BifrostRequest>,
    pub result: Result<ResponseStream, BifrostError>,
}

pub(crate) enum Job {
    Unary(oneshot::Sender<UnaryReply>),
    Stream(oneshot::Sender<StreamReply>),
}

/// One queued unit of work for a provider worker.
pub(crate) struct Envelope {
    pub ctx: Arc<RequestContext>,
    pub request: Pooled<BifrostRequest>,
    pub request_type: RequestType,
    pub job: Job,
}
