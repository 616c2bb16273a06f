//! Shared harness: a client on a channel transport with recording callbacks.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use botlink_client::{
    BotClient, ChannelPeer, ChannelTransport, ClientOptions, EventCallbacks, PeerEvent,
};
use botlink_core::TransportState;
use botlink_core::protocol::OutboundEnvelope;
use botlink_core::types::{
    BotLlmSearchResponseData, BotReadyData, BotText, LlmFunctionCallData, StorageItemStoredData,
    Transcript,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// One recorded callback.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    State(TransportState),
    Connected,
    Disconnected,
    BotReady(BotReadyData),
    BackendError(String),
    UserTranscript(Transcript),
    BotTranscript(String),
    BotLlmText(String),
    BotTtsText(String),
    Speaking(&'static str),
    Pipeline(&'static str),
    ServerMessage(Value),
    Metrics(Value),
    FunctionCall(LlmFunctionCallData),
    SearchResponse(BotLlmSearchResponseData),
    StorageItemStored(StorageItemStoredData),
}

pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    fn push(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl EventCallbacks for Recorder {
    fn on_transport_state_changed(&self, state: TransportState) {
        self.push(Event::State(state));
    }
    fn on_connected(&self) {
        self.push(Event::Connected);
    }
    fn on_disconnected(&self) {
        self.push(Event::Disconnected);
    }
    fn on_bot_ready(&self, data: &BotReadyData) {
        self.push(Event::BotReady(data.clone()));
    }
    fn on_backend_error(&self, message: &str) {
        self.push(Event::BackendError(message.to_string()));
    }
    fn on_user_transcript(&self, transcript: &Transcript) {
        self.push(Event::UserTranscript(transcript.clone()));
    }
    fn on_bot_transcript(&self, text: &str) {
        self.push(Event::BotTranscript(text.to_string()));
    }
    fn on_user_started_speaking(&self) {
        self.push(Event::Speaking("user-started"));
    }
    fn on_user_stopped_speaking(&self) {
        self.push(Event::Speaking("user-stopped"));
    }
    fn on_bot_started_speaking(&self) {
        self.push(Event::Speaking("bot-started"));
    }
    fn on_bot_stopped_speaking(&self) {
        self.push(Event::Speaking("bot-stopped"));
    }
    fn on_bot_llm_text(&self, data: &BotText) {
        self.push(Event::BotLlmText(data.text.clone()));
    }
    fn on_bot_tts_text(&self, data: &BotText) {
        self.push(Event::BotTtsText(data.text.clone()));
    }
    fn on_bot_llm_started(&self) {
        self.push(Event::Pipeline("llm-started"));
    }
    fn on_bot_llm_stopped(&self) {
        self.push(Event::Pipeline("llm-stopped"));
    }
    fn on_bot_tts_started(&self) {
        self.push(Event::Pipeline("tts-started"));
    }
    fn on_bot_tts_stopped(&self) {
        self.push(Event::Pipeline("tts-stopped"));
    }
    fn on_server_message(&self, data: &Value) {
        self.push(Event::ServerMessage(data.clone()));
    }
    fn on_metrics(&self, data: &Value) {
        self.push(Event::Metrics(data.clone()));
    }
    fn on_llm_function_call(&self, call: &LlmFunctionCallData) {
        self.push(Event::FunctionCall(call.clone()));
    }
    fn on_bot_llm_search_response(&self, data: &BotLlmSearchResponseData) {
        self.push(Event::SearchResponse(data.clone()));
    }
    fn on_storage_item_stored(&self, data: &StorageItemStoredData) {
        self.push(Event::StorageItemStored(data.clone()));
    }
}

pub struct Harness {
    pub client: BotClient,
    pub peer: ChannelPeer,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_options(|options| options)
    }

    pub fn with_options(configure: impl FnOnce(ClientOptions) -> ClientOptions) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let (transport, peer) = ChannelTransport::pair();
        let options = configure(ClientOptions::new(Arc::new(Recorder { tx })));
        let client = BotClient::new(Arc::new(transport), options).unwrap();
        Self {
            client,
            peer,
            events,
        }
    }

    /// Wait until jobs queued so far, and the callbacks they post, have run.
    pub async fn settle(&self) {
        let ctx = self.client.execution_context();
        for _ in 0..4 {
            ctx.call(|| ()).await.unwrap();
        }
    }

    /// Everything recorded so far, after settling.
    pub async fn drain(&mut self) -> Vec<Event> {
        self.settle().await;
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn peer_event(&mut self) -> PeerEvent {
        timeout(TIMEOUT, self.peer.next_event())
            .await
            .expect("timed out waiting for peer event")
            .expect("transport dropped")
    }

    pub async fn peer_message(&mut self, msg_type: &str) -> OutboundEnvelope {
        timeout(TIMEOUT, self.peer.next_message_of(msg_type))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for '{msg_type}'"))
            .expect("transport dropped")
    }

    /// Connect, play the bot's side of the handshake, and wait until ready.
    pub async fn connect_ready(&mut self) {
        let ready = self.client.connect(json!({}));
        let _ = self.peer_message("client-ready").await;
        self.peer.bot_ready();
        timeout(TIMEOUT, ready.wait())
            .await
            .expect("timed out waiting for ready")
            .expect("connect failed");
        let _ = self.drain().await;
    }

    /// Outbound messages of `msg_type` already queued at the peer.
    pub async fn queued_messages(&mut self, msg_type: &str) -> Vec<OutboundEnvelope> {
        self.settle().await;
        let mut out = Vec::new();
        while let Some(event) = self.peer.try_next_event() {
            if let PeerEvent::Message(msg) = event {
                if msg.msg_type == msg_type {
                    out.push(msg);
                }
            }
        }
        out
    }
}
