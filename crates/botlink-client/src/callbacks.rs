//! Application callbacks.
//!
//! Every callback runs on the client's execution context, never concurrently
//! with another callback or with engine bookkeeping. Implementations may call
//! back into the client; such calls run inline.

use serde_json::Value;

use botlink_core::TransportState;
use botlink_core::types::{
    BotLlmSearchResponseData, BotReadyData, BotText, LlmFunctionCallData, StorageItemStoredData,
    Transcript,
};

/// Receives session events. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait EventCallbacks: Send + Sync {
    /// The transport moved to a new state.
    fn on_transport_state_changed(&self, state: TransportState) {}

    /// The transport connected.
    fn on_connected(&self) {}

    /// The connection ended and all pending work was cancelled.
    fn on_disconnected(&self) {}

    /// The bot is ready. Fires once per connection.
    fn on_bot_ready(&self, data: &BotReadyData) {}

    /// The backend reported an error, or an inbound message could not be handled.
    fn on_backend_error(&self, message: &str) {}

    /// User speech transcript, interim or final.
    fn on_user_transcript(&self, transcript: &Transcript) {}

    /// Text the bot spoke.
    fn on_bot_transcript(&self, text: &str) {}

    /// User speech began.
    fn on_user_started_speaking(&self) {}
    /// User speech ended.
    fn on_user_stopped_speaking(&self) {}
    /// Bot speech began.
    fn on_bot_started_speaking(&self) {}
    /// Bot speech ended.
    fn on_bot_stopped_speaking(&self) {}

    /// Streaming chunk from the bot's LLM.
    fn on_bot_llm_text(&self, data: &BotText) {}

    /// Streaming chunk from the bot's TTS.
    fn on_bot_tts_text(&self, data: &BotText) {}

    /// Bot LLM response began.
    fn on_bot_llm_started(&self) {}
    /// Bot LLM response ended.
    fn on_bot_llm_stopped(&self) {}
    /// Bot TTS output began.
    fn on_bot_tts_started(&self) {}
    /// Bot TTS output ended.
    fn on_bot_tts_stopped(&self) {}

    /// Unsolicited application message from the server.
    fn on_server_message(&self, data: &Value) {}

    /// Pipeline metrics.
    fn on_metrics(&self, data: &Value) {}

    /// The bot requested a function call. Fires whether or not a handler is registered.
    fn on_llm_function_call(&self, call: &LlmFunctionCallData) {}

    /// Search grounding data from the bot's LLM.
    fn on_bot_llm_search_response(&self, data: &BotLlmSearchResponseData) {}

    /// The bot stored items.
    fn on_storage_item_stored(&self, data: &StorageItemStoredData) {}
}

/// Callbacks that ignore everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallbacks;

impl EventCallbacks for NoopCallbacks {}
