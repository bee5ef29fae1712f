//! Canonical request/response model for the bifrost gateway.
//!
//! Every provider adapter translates between these types and its vendor wire
//! format; the core itself never sees vendor JSON. This crate intentionally
//! does **not** depend on tokio or any HTTP client.

pub mod error;
pub mod provider;
pub mod request;
pub mod response;

pub use error::{BifrostError, ErrorExtra, ErrorKind, StreamControl};
pub use provider::ProviderId;
pub use request::{
    BifrostRequest, ChatCompletionInput, ChatMessage, ChatRole, EmbeddingInput, Fallback,
    ModelParams, RequestInput, RequestType, ResponsesInput, SpeechInput, TextCompletionInput,
    TranscriptionInput,
};
pub use response::{
    BifrostResponse, ChatChoice, ChatCompletionOutput, ChatDelta, EmbeddingOutput, ExtraFields,
    ResponsePayload, ResponsesOutput, SpeechOutput, TextCompletionOutput, TranscriptionOutput,
    Usage,
};
