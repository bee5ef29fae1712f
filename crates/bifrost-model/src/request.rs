use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

/// Discriminator for every operation the gateway can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    TextCompletion,
    TextCompletionStream,
    ChatCompletion,
    ChatCompletionStream,
    Responses,
    ResponsesStream,
    Embedding,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
}

impl RequestType {
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            RequestType::TextCompletionStream
                | RequestType::ChatCompletionStream
                | RequestType::ResponsesStream
                | RequestType::SpeechStream
                | RequestType::TranscriptionStream
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::TextCompletion => "text_completion",
            RequestType::TextCompletionStream => "text_completion_stream",
            RequestType::ChatCompletion => "chat_completion",
            RequestType::ChatCompletionStream => "chat_completion_stream",
            RequestType::Responses => "responses",
            RequestType::ResponsesStream => "responses_stream",
            RequestType::Embedding => "embedding",
            RequestType::Speech => "speech",
            RequestType::SpeechStream => "speech_stream",
            RequestType::Transcription => "transcription",
            RequestType::TranscriptionStream => "transcription_stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionInput {
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionInput {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesInput {
    pub input: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechInput {
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionInput {
    pub audio: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Exactly one typed payload per request; the variant is the operation family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestInput {
    TextCompletion(TextCompletionInput),
    ChatCompletion(ChatCompletionInput),
    Responses(ResponsesInput),
    Embedding(EmbeddingInput),
    Speech(SpeechInput),
    Transcription(TranscriptionInput),
}

impl RequestInput {
    /// Whether this payload is the right one for `request_type`.
    pub fn matches(&self, request_type: RequestType) -> bool {
        matches!(
            (self, request_type),
            (
                RequestInput::TextCompletion(_),
                RequestType::TextCompletion | RequestType::TextCompletionStream
            ) | (
                RequestInput::ChatCompletion(_),
                RequestType::ChatCompletion | RequestType::ChatCompletionStream
            ) | (
                RequestInput::Responses(_),
                RequestType::Responses | RequestType::ResponsesStream
            ) | (RequestInput::Embedding(_), RequestType::Embedding)
                | (
                    RequestInput::Speech(_),
                    RequestType::Speech | RequestType::SpeechStream
                )
                | (
                    RequestInput::Transcription(_),
                    RequestType::Transcription | RequestType::TranscriptionStream
                )
        )
    }
}

impl Default for RequestInput {
    fn default() -> Self {
        RequestInput::ChatCompletion(ChatCompletionInput::default())
    }
}

/// One alternative routing target tried in order when the primary fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub provider: ProviderId,
    pub model: String,
}

impl Fallback {
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Model-tuning parameters understood across providers. Vendor-specific
/// switches travel in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// The canonical request envelope.
///
/// Owned by the dispatcher for the lifetime of the call; the engine recycles
/// envelopes through an object pool, so [`BifrostRequest::reset`] must clear
/// every field a previous call could have populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BifrostRequest {
    pub provider: ProviderId,
    pub model: String,
    pub input: RequestInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ModelParams>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Fallback>,
}

impl BifrostRequest {
    pub fn new(
        provider: impl Into<ProviderId>,
        model: impl Into<String>,
        input: RequestInput,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input,
            params: None,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<Fallback>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Clears the envelope for reuse, keeping allocated capacity where cheap.
    pub fn reset(&mut self) {
        self.provider = ProviderId::default();
        self.model.clear();
        self.input = RequestInput::default();
        self.params = None;
        self.fallbacks.clear();
    }
}
