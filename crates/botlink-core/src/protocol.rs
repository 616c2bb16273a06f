//! Wire envelopes exchanged with the bot.
//!
//! Every message is a JSON object `{id, label, type, data}`. Outbound
//! envelopes always carry an id; inbound ones carry one only when they answer
//! a request.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::SessionError;
use crate::ids::MessageId;
use crate::types::{
    ClientInfo, DataMessage, LlmContextMessage, LlmFunctionCallResult, SendTextOptions,
};

/// Label carried by every outbound envelope.
pub const LABEL: &str = "rtvi-ai";

/// Protocol version announced in `client-ready`.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Reserved correlation id meaning "answers nothing".
pub const NO_CORRELATION_ID: &str = "END";

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundType {
    /// Client finished connecting.
    ClientReady,
    /// Ask the bot to end its session.
    DisconnectBot,
    /// Application message, optionally answered by `server-response`.
    ClientMessage,
    /// User text for the bot's conversation.
    SendText,
    /// Deprecated context injection.
    AppendToContext,
    /// Result of a bot-requested function call.
    LlmFunctionCallResult,
}

impl OutboundType {
    /// Wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientReady => "client-ready",
            Self::DisconnectBot => "disconnect-bot",
            Self::ClientMessage => "client-message",
            Self::SendText => "send-text",
            Self::AppendToContext => "append-to-context",
            Self::LlmFunctionCallResult => "llm-function-call-result",
        }
    }
}

/// Envelope sent from the client to the bot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Message id, echoed by correlated responses.
    pub id: MessageId,
    /// Always [`LABEL`].
    pub label: String,
    /// Wire type tag.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Payload, `null` when absent.
    pub data: Option<Value>,
}

impl OutboundEnvelope {
    fn new(id: MessageId, msg_type: OutboundType, data: Option<Value>) -> Self {
        Self {
            id,
            label: LABEL.to_string(),
            msg_type: msg_type.as_str().to_string(),
            data,
        }
    }

    /// `client-ready` announcing the protocol version and client library.
    pub fn client_ready(about: &ClientInfo) -> Self {
        Self::new(
            MessageId::new(),
            OutboundType::ClientReady,
            Some(json!({ "version": PROTOCOL_VERSION, "about": about })),
        )
    }

    /// `disconnect-bot`.
    pub fn disconnect_bot() -> Self {
        Self::new(MessageId::new(), OutboundType::DisconnectBot, None)
    }

    /// `client-message` with an application type and payload.
    pub fn client_message(id: MessageId, msg_type: impl Into<String>, data: Value) -> Self {
        let message = DataMessage {
            msg_type: msg_type.into(),
            data,
        };
        Self::new(id, OutboundType::ClientMessage, Some(json!(message)))
    }

    /// `send-text`.
    pub fn send_text(content: impl Into<String>, options: &SendTextOptions) -> Self {
        Self::new(
            MessageId::new(),
            OutboundType::SendText,
            Some(json!({ "content": content.into(), "options": options })),
        )
    }

    /// `append-to-context`.
    pub fn append_to_context(id: MessageId, message: &LlmContextMessage) -> Self {
        Self::new(id, OutboundType::AppendToContext, Some(json!(message)))
    }

    /// `llm-function-call-result`.
    pub fn llm_function_call_result(id: MessageId, result: &LlmFunctionCallResult) -> Self {
        Self::new(id, OutboundType::LlmFunctionCallResult, Some(json!(result)))
    }

    /// Parsed wire type, if it names a known outbound type.
    pub fn kind(&self) -> Option<OutboundType> {
        [
            OutboundType::ClientReady,
            OutboundType::DisconnectBot,
            OutboundType::ClientMessage,
            OutboundType::SendText,
            OutboundType::AppendToContext,
            OutboundType::LlmFunctionCallResult,
        ]
        .into_iter()
        .find(|t| t.as_str() == self.msg_type)
    }

    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_value(self.data.clone().unwrap_or(Value::Null))?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound message types understood by the dispatcher.
///
/// This is the union of every schema the backend has used. Tags outside it
/// parse to `None` and are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum InboundType {
    BotReady,
    Error,
    ErrorResponse,
    ServerResponse,
    AppendToContextResult,
    Config,
    ConfigAvailable,
    ActionsAvailable,
    ActionResponse,
    UserTranscription,
    BotTranscription,
    /// Older tag for bot transcription.
    TtsText,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    BotLlmText,
    BotLlmStarted,
    BotLlmStopped,
    BotTtsText,
    BotTtsStarted,
    BotTtsStopped,
    ServerMessage,
    Metrics,
    LlmFunctionCall,
    BotLlmSearchResponse,
    StorageItemStored,
}

impl InboundType {
    /// Parse a wire tag.
    pub fn parse(tag: &str) -> Option<Self> {
        let kind = match tag {
            "bot-ready" => Self::BotReady,
            "error" => Self::Error,
            "error-response" => Self::ErrorResponse,
            "server-response" => Self::ServerResponse,
            "append-to-context-result" => Self::AppendToContextResult,
            "config" => Self::Config,
            "config-available" => Self::ConfigAvailable,
            "actions-available" => Self::ActionsAvailable,
            "action-response" => Self::ActionResponse,
            "user-transcription" => Self::UserTranscription,
            "bot-transcription" => Self::BotTranscription,
            "tts-text" => Self::TtsText,
            "user-started-speaking" => Self::UserStartedSpeaking,
            "user-stopped-speaking" => Self::UserStoppedSpeaking,
            "bot-started-speaking" => Self::BotStartedSpeaking,
            "bot-stopped-speaking" => Self::BotStoppedSpeaking,
            "bot-llm-text" => Self::BotLlmText,
            "bot-llm-started" => Self::BotLlmStarted,
            "bot-llm-stopped" => Self::BotLlmStopped,
            "bot-tts-text" => Self::BotTtsText,
            "bot-tts-started" => Self::BotTtsStarted,
            "bot-tts-stopped" => Self::BotTtsStopped,
            "server-message" => Self::ServerMessage,
            "metrics" => Self::Metrics,
            "llm-function-call" => Self::LlmFunctionCall,
            "bot-llm-search-response" | "llm-search-response" => Self::BotLlmSearchResponse,
            "storage-item-stored" => Self::StorageItemStored,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether this type answers a request and must carry its id.
    pub fn is_correlated(self) -> bool {
        matches!(
            self,
            Self::ErrorResponse
                | Self::ServerResponse
                | Self::AppendToContextResult
                | Self::Config
                | Self::ConfigAvailable
                | Self::ActionsAvailable
                | Self::ActionResponse
        )
    }
}

/// Envelope received from the bot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Correlation id, present on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Sender label.
    #[serde(default)]
    pub label: String,
    /// Wire type tag.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Payload.
    #[serde(default)]
    pub data: Value,
}

impl InboundEnvelope {
    /// Build an envelope; used by transports and tests.
    pub fn new(msg_type: impl Into<String>, id: Option<MessageId>, data: Value) -> Self {
        Self {
            id,
            label: LABEL.to_string(),
            msg_type: msg_type.into(),
            data,
        }
    }

    /// Parse one JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parsed wire type.
    pub fn kind(&self) -> Option<InboundType> {
        InboundType::parse(&self.msg_type)
    }

    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorData, Role};

    #[test]
    fn outbound_carries_label_and_null_data() {
        let env = OutboundEnvelope::disconnect_bot();
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["label"], "rtvi-ai");
        assert_eq!(value["type"], "disconnect-bot");
        assert!(value["data"].is_null());
        assert!(value["id"].as_str().unwrap().starts_with("msg_"));
    }

    #[test]
    fn client_ready_announces_version_and_library() {
        let env = OutboundEnvelope::client_ready(&ClientInfo::default());
        let data = env.data.unwrap();
        assert_eq!(data["version"], PROTOCOL_VERSION);
        assert_eq!(data["about"]["library"], "botlink");
        assert!(data["about"]["library_version"].is_string());
    }

    #[test]
    fn client_message_keeps_id_and_wraps_payload() {
        let id = MessageId::from_raw("X");
        let env =
            OutboundEnvelope::client_message(id.clone(), "get-weather", json!({"city": "Oslo"}));
        assert_eq!(env.id, id);
        assert_eq!(env.kind(), Some(OutboundType::ClientMessage));
        let msg: DataMessage = env.decode().unwrap();
        assert_eq!(msg.msg_type, "get-weather");
        assert_eq!(msg.data["city"], "Oslo");
    }

    #[test]
    fn send_text_nests_options() {
        let opts = SendTextOptions { run_immediately: Some(false), audio_response: Some(true) };
        let env = OutboundEnvelope::send_text("hello", &opts);
        assert_eq!(
            env.data.unwrap(),
            json!({
                "content": "hello",
                "options": {"run_immediately": false, "audio_response": true},
            })
        );
    }

    #[test]
    fn append_to_context_uses_given_id() {
        let id = MessageId::from_raw("ctx-1");
        let msg = LlmContextMessage {
            role: Role::User,
            content: "hi".into(),
            run_immediately: None,
        };
        let env = OutboundEnvelope::append_to_context(id, &msg);
        assert_eq!(env.id.as_str(), "ctx-1");
        assert_eq!(env.data.unwrap()["role"], "user");
    }

    #[test]
    fn inbound_parses_without_id_or_data() {
        let env = InboundEnvelope::from_json(r#"{"label":"rtvi-ai","type":"bot-started-speaking"}"#)
            .unwrap();
        assert!(env.id.is_none());
        assert!(env.data.is_null());
        assert_eq!(env.kind(), Some(InboundType::BotStartedSpeaking));
    }

    #[test]
    fn inbound_decode_error_is_decode_kind() {
        let env = InboundEnvelope::new("error-response", None, json!({"nope": 1}));
        let err = env.decode::<ErrorData>().unwrap_err();
        assert_eq!(err.error_kind(), "decode_error");
    }

    #[test]
    fn malformed_frame_is_decode_error() {
        let err = InboundEnvelope::from_json("{").unwrap_err();
        assert_eq!(err.error_kind(), "decode_error");
    }

    #[test]
    fn unknown_tags_parse_to_none() {
        assert_eq!(InboundType::parse("brand-new-event"), None);
        assert_eq!(InboundType::parse(""), None);
    }

    #[test]
    fn search_response_accepts_both_tags() {
        assert_eq!(
            InboundType::parse("llm-search-response"),
            Some(InboundType::BotLlmSearchResponse)
        );
        assert_eq!(
            InboundType::parse("bot-llm-search-response"),
            Some(InboundType::BotLlmSearchResponse)
        );
    }

    #[test]
    fn correlated_types() {
        assert!(InboundType::ServerResponse.is_correlated());
        assert!(InboundType::ErrorResponse.is_correlated());
        assert!(InboundType::ActionResponse.is_correlated());
        assert!(!InboundType::BotReady.is_correlated());
        assert!(!InboundType::LlmFunctionCall.is_correlated());
        assert!(!InboundType::StorageItemStored.is_correlated());
    }
}
