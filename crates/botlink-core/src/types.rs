//! Session state and payload types exchanged with the bot.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of the session transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportState {
    /// No connection.
    #[default]
    Disconnected,
    /// Devices are being prepared.
    Initializing,
    /// Devices are ready; authorization may start.
    Initialized,
    /// The authorization request is in flight.
    Authorizing,
    /// Authorization returned connection parameters.
    Authorized,
    /// The transport is establishing the connection.
    Connecting,
    /// The transport is connected; the bot is not ready yet.
    Connected,
    /// The bot reported ready.
    Ready,
    /// The transport failed.
    Error,
}

impl TransportState {
    /// Whether authorization or a live connection is underway.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Authorizing | Self::Connecting | Self::Connected | Self::Ready
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Payload of the `bot-ready` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotReadyData {
    /// Protocol version spoken by the bot.
    pub version: String,
    /// Free-form bot description.
    #[serde(default)]
    pub about: Option<Value>,
}

/// Payload of `error` and `error-response` messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error description from the bot.
    pub error: String,
    /// Whether the bot considers the session unusable.
    #[serde(default)]
    pub fatal: bool,
}

/// Application message carried by `client-message` and `server-response`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Application-defined message type.
    #[serde(rename = "t")]
    pub msg_type: String,
    /// Application-defined payload.
    #[serde(rename = "d", default)]
    pub data: Value,
}

/// A written transcript of spoken words.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Transcribed text.
    pub text: String,
    /// Whether the transcript is final or interim.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Backend timestamp, if any.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Speaking participant, if known.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Streaming text chunk from the bot's LLM or TTS stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotText {
    /// The chunk.
    pub text: String,
}

/// Options for `send-text`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendTextOptions {
    /// Run the bot immediately after appending the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_immediately: Option<bool>,
    /// Whether the bot should answer with audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_response: Option<bool>,
}

/// Conversation role for context messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The bot side of the conversation.
    Assistant,
}

/// Message appended to the bot's LLM context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmContextMessage {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
    /// Run the bot immediately after appending.
    #[serde(default)]
    pub run_immediately: Option<bool>,
}

/// Payload of `append-to-context-result`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppendToContextResultData {
    /// Free-form result.
    #[serde(default)]
    pub result: Value,
}

/// Payload of `llm-function-call`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmFunctionCallData {
    /// Name of the function the bot wants invoked.
    pub function_name: String,
    /// LLM tool-call id echoed back in the result.
    pub tool_call_id: String,
    /// Call arguments.
    #[serde(default)]
    pub args: Value,
}

/// Payload of `llm-function-call-result`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmFunctionCallResult {
    /// Name of the invoked function.
    pub function_name: String,
    /// LLM tool-call id from the call.
    pub tool_call_id: String,
    /// Arguments from the call.
    pub arguments: Value,
    /// Handler result.
    pub result: Value,
}

/// Search entry point from a bot LLM search response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchEntryPoint {
    /// Pre-rendered HTML for the entry point.
    #[serde(default)]
    pub rendered_content: Option<String>,
}

/// Web source of a grounding chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    /// Source URI.
    #[serde(default)]
    pub uri: Option<String>,
    /// Source title.
    #[serde(default)]
    pub title: Option<String>,
}

/// A grounding chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingChunk {
    /// Web source, if the chunk came from the web.
    #[serde(default)]
    pub web: Option<WebSource>,
}

/// Text span supported by grounding chunks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingSegment {
    /// Index of the response part.
    #[serde(default)]
    pub part_index: Option<i64>,
    /// Start offset within the part.
    #[serde(default)]
    pub start_index: Option<i64>,
    /// End offset within the part.
    #[serde(default)]
    pub end_index: Option<i64>,
    /// Segment text.
    #[serde(default)]
    pub text: Option<String>,
}

/// Links a segment to the chunks supporting it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingSupport {
    /// Supported text span.
    #[serde(default)]
    pub segment: Option<GroundingSegment>,
    /// Indices into the grounding chunks.
    #[serde(default)]
    pub grounding_chunk_indices: Option<Vec<i64>>,
    /// Confidence per referenced chunk.
    #[serde(default)]
    pub confidence_scores: Option<Vec<f64>>,
}

/// Payload of `bot-llm-search-response`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotLlmSearchResponseData {
    /// Rendered search entry point.
    #[serde(default)]
    pub search_entry_point: Option<SearchEntryPoint>,
    /// Sources used for grounding.
    #[serde(default)]
    pub grounding_chunks: Option<Vec<GroundingChunk>>,
    /// Spans backed by the sources.
    #[serde(default)]
    pub grounding_supports: Option<Vec<GroundingSupport>>,
    /// Queries the model issued.
    #[serde(default)]
    pub web_search_queries: Option<Vec<String>>,
}

/// Payload of `storage-item-stored`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageItemStoredData {
    /// Storage action performed by the bot.
    pub action: String,
    /// Items affected.
    #[serde(default)]
    pub items: Value,
}

/// Identifies a local media device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MediaDeviceId(pub String);

/// A local media device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    /// Device identifier.
    pub id: MediaDeviceId,
    /// Human-readable name.
    pub name: String,
}

/// Identifies a media track.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MediaTrackId(pub String);

/// Media tracks of one participant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantTracks {
    /// Audio track, if publishing.
    pub audio: Option<MediaTrackId>,
    /// Video track, if publishing.
    pub video: Option<MediaTrackId>,
}

/// Media tracks of the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tracks {
    /// Tracks published by this client.
    pub local: ParticipantTracks,
    /// Tracks published by the bot.
    pub bot: Option<ParticipantTracks>,
}

/// Client identification sent in `client-ready`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Library name.
    pub library: String,
    /// Library version.
    pub library_version: String,
    /// Platform name.
    pub platform: String,
    /// Platform version.
    pub platform_version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            library: "botlink".to_string(),
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            platform_version: std::env::consts::ARCH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn busy_states() {
        for state in [
            TransportState::Authorizing,
            TransportState::Connecting,
            TransportState::Connected,
            TransportState::Ready,
        ] {
            assert!(state.is_busy(), "{state} should be busy");
        }
        for state in [
            TransportState::Disconnected,
            TransportState::Initializing,
            TransportState::Initialized,
            TransportState::Authorized,
            TransportState::Error,
        ] {
            assert!(!state.is_busy(), "{state} should not be busy");
        }
    }

    #[test]
    fn data_message_uses_short_keys() {
        let msg = DataMessage { msg_type: "get-weather".into(), data: json!({"city": "Oslo"}) };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"t": "get-weather", "d": {"city": "Oslo"}}));
    }

    #[test]
    fn transcript_decodes_final_flag() {
        let t: Transcript =
            serde_json::from_value(json!({"text": "hi", "final": true, "user_id": "u1"})).unwrap();
        assert!(t.is_final);
        assert_eq!(t.user_id.as_deref(), Some("u1"));
        assert!(t.timestamp.is_none());
    }

    #[test]
    fn send_text_options_omit_unset_fields() {
        let opts = SendTextOptions { run_immediately: Some(true), audio_response: None };
        assert_eq!(serde_json::to_value(&opts).unwrap(), json!({"run_immediately": true}));
        assert_eq!(serde_json::to_value(SendTextOptions::default()).unwrap(), json!({}));
    }

    #[test]
    fn context_message_role_is_lowercase() {
        let msg = LlmContextMessage {
            role: Role::Assistant,
            content: "ok".into(),
            run_immediately: Some(false),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["run_immediately"], false);
    }

    #[test]
    fn function_call_data_defaults_args() {
        let data: LlmFunctionCallData =
            serde_json::from_value(json!({"function_name": "foo", "tool_call_id": "t1"})).unwrap();
        assert_eq!(data.args, Value::Null);
    }

    #[test]
    fn search_response_tolerates_partial_payload() {
        let data: BotLlmSearchResponseData = serde_json::from_value(json!({
            "web_search_queries": ["rust"],
            "grounding_chunks": [{"web": {"uri": "https://example.com"}}]
        }))
        .unwrap();
        assert_eq!(data.web_search_queries.unwrap(), vec!["rust".to_string()]);
        let chunks = data.grounding_chunks.unwrap();
        assert_eq!(chunks[0].web.as_ref().unwrap().uri.as_deref(), Some("https://example.com"));
        assert!(data.search_entry_point.is_none());
    }

    #[test]
    fn client_info_default_names_library() {
        let info = ClientInfo::default();
        assert_eq!(info.library, "botlink");
        assert!(!info.library_version.is_empty());
    }
}
