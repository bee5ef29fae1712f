use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;
use crate::request::{ChatMessage, ChatRole, RequestType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Incremental content for one streamed choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One completion choice: `message` on unary responses, `delta` on chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionOutput {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionOutput {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesOutput {
    pub output: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechOutput {
    pub audio: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    pub text: String,
}

/// Exactly one typed payload per response, mirroring the request family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePayload {
    TextCompletion(TextCompletionOutput),
    ChatCompletion(ChatCompletionOutput),
    Responses(ResponsesOutput),
    Embedding(EmbeddingOutput),
    Speech(SpeechOutput),
    Transcription(TranscriptionOutput),
}

impl ResponsePayload {
    /// Empty payload of the family matching `request_type`, used when the
    /// core must synthesize a terminal chunk itself.
    pub fn empty_for(request_type: RequestType) -> Self {
        match request_type {
            RequestType::TextCompletion | RequestType::TextCompletionStream => {
                ResponsePayload::TextCompletion(TextCompletionOutput::default())
            }
            RequestType::ChatCompletion | RequestType::ChatCompletionStream => {
                ResponsePayload::ChatCompletion(ChatCompletionOutput::default())
            }
            RequestType::Responses | RequestType::ResponsesStream => {
                ResponsePayload::Responses(ResponsesOutput::default())
            }
            RequestType::Embedding => ResponsePayload::Embedding(EmbeddingOutput::default()),
            RequestType::Speech | RequestType::SpeechStream => {
                ResponsePayload::Speech(SpeechOutput::default())
            }
            RequestType::Transcription | RequestType::TranscriptionStream => {
                ResponsePayload::Transcription(TranscriptionOutput::default())
            }
        }
    }
}

impl Default for ResponsePayload {
    fn default() -> Self {
        ResponsePayload::ChatCompletion(ChatCompletionOutput::default())
    }
}

/// Per-response observability record. Attached to every response and every
/// stream chunk; plugins and telemetry read routing facts from here instead
/// of re-deriving them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraFields {
    pub request_type: Option<RequestType>,
    pub provider: ProviderId,
    pub model_requested: String,
    /// Wall time spent in the adapter call; on the final stream chunk this is
    /// the total stream duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<Duration>,
    /// Position within a stream, strictly increasing from 0. Unset on unary
    /// responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_debug: Option<serde_json::Value>,
}

/// The canonical response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BifrostResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub payload: ResponsePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub extra: ExtraFields,
}

impl BifrostResponse {
    pub fn new(payload: ResponsePayload) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Convenience for the dominant case: a single assistant message.
    pub fn chat_message(content: impl Into<String>) -> Self {
        Self::new(ResponsePayload::ChatCompletion(ChatCompletionOutput {
            choices: vec![ChatChoice {
                index: 0,
                message: Some(ChatMessage::assistant(content)),
                delta: None,
                finish_reason: Some("stop".to_string()),
            }],
        }))
    }

    /// Convenience for streaming: a single content delta.
    pub fn chat_delta(content: impl Into<String>) -> Self {
        Self::new(ResponsePayload::ChatCompletion(ChatCompletionOutput {
            choices: vec![ChatChoice {
                index: 0,
                message: None,
                delta: Some(ChatDelta {
                    role: None,
                    content: Some(content.into()),
                }),
                finish_reason: None,
            }],
        }))
    }
}
