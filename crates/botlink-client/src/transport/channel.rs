//! In-memory transport.
//!
//! [`ChannelTransport`] connects instantly and delivers every outbound
//! envelope to a [`ChannelPeer`], which plays the bot: it sees what the
//! client sends and injects inbound envelopes or ends the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use botlink_core::protocol::{InboundEnvelope, OutboundEnvelope, PROTOCOL_VERSION};
use botlink_core::types::{MediaDeviceId, MediaDeviceInfo, Tracks};
use botlink_core::{AsyncResult, MessageId, SessionError, TransportState};

use super::{LocalMedia, Transport, TransportContext};

/// What the peer observes.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerEvent {
    /// The client connected with these parameters.
    Connected(Value),
    /// The client sent an envelope.
    Message(OutboundEnvelope),
    /// The client disconnected.
    Disconnected,
}

struct ChannelShared {
    tctx: OnceLock<TransportContext>,
    events: mpsc::UnboundedSender<PeerEvent>,
    connected: AtomicBool,
    fail_next_connect: Mutex<Option<SessionError>>,
    media: LocalMedia,
}

impl ChannelShared {
    fn tctx(&self) -> &TransportContext {
        match self.tctx.get() {
            Some(tctx) => tctx,
            None => panic!("channel transport used before initialize"),
        }
    }

    fn end(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(tctx) = self.tctx.get() {
            tctx.on_connection_end();
        }
        true
    }
}

/// Client half of an in-memory connection.
pub struct ChannelTransport {
    shared: Arc<ChannelShared>,
}

impl ChannelTransport {
    /// A transport and the peer it talks to.
    pub fn pair() -> (Self, ChannelPeer) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared {
            tctx: OnceLock::new(),
            events,
            connected: AtomicBool::new(false),
            fail_next_connect: Mutex::new(None),
            media: LocalMedia::default(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ChannelPeer { shared, events: rx },
        )
    }

    fn ok(&self) -> AsyncResult<(), SessionError> {
        AsyncResult::resolved_ok(self.shared.tctx().execution_context(), ())
    }

    fn resolved<T>(&self, result: Result<T, SessionError>) -> AsyncResult<T, SessionError>
    where
        T: Clone + Send + 'static,
    {
        AsyncResult::resolved(self.shared.tctx().execution_context(), result)
    }
}

impl Transport for ChannelTransport {
    fn initialize(&self, ctx: TransportContext) {
        let options = ctx.options();
        self.shared.media.set_mic_enabled(options.enable_mic);
        self.shared.media.set_cam_enabled(options.enable_cam);
        if self.shared.tctx.set(ctx).is_err() {
            warn!("channel transport initialized twice");
        }
    }

    fn init_devices(&self) -> AsyncResult<(), SessionError> {
        let tctx = self.shared.tctx();
        tctx.set_state(TransportState::Initializing);
        self.shared.media.set_devices(
            vec![MediaDeviceInfo {
                id: MediaDeviceId("channel-mic".into()),
                name: "Channel microphone".into(),
            }],
            vec![MediaDeviceInfo {
                id: MediaDeviceId("channel-cam".into()),
                name: "Channel camera".into(),
            }],
        );
        tctx.set_state(TransportState::Initialized);
        self.ok()
    }

    fn release(&self) {
        let _ = self.shared.end();
    }

    fn connect(&self, params: Value) -> AsyncResult<(), SessionError> {
        let tctx = self.shared.tctx();
        if let Some(err) = self.shared.fail_next_connect.lock().take() {
            tctx.set_state(TransportState::Error);
            return self.resolved(Err(err));
        }
        if self.shared.connected.swap(true, Ordering::SeqCst) {
            return self.resolved(Err(SessionError::transport("already connected")));
        }

        tctx.set_state(TransportState::Connecting);
        let _ = self.shared.events.send(PeerEvent::Connected(params));
        tctx.set_state(TransportState::Connected);
        let _ = self
            .shared
            .events
            .send(PeerEvent::Message(tctx.client_ready_message()));
        self.ok()
    }

    fn disconnect(&self) -> AsyncResult<(), SessionError> {
        if self.shared.end() {
            let _ = self.shared.events.send(PeerEvent::Disconnected);
        }
        self.ok()
    }

    fn send_message(&self, msg: OutboundEnvelope) -> AsyncResult<(), SessionError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return self.resolved(Err(SessionError::transport("not connected")));
        }
        let result = self
            .shared
            .events
            .send(PeerEvent::Message(msg))
            .map_err(|_| SessionError::transport("peer closed"));
        self.resolved(result)
    }

    fn available_mics(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError> {
        self.resolved(Ok(self.shared.media.mics()))
    }

    fn available_cams(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError> {
        self.resolved(Ok(self.shared.media.cams()))
    }

    fn update_mic(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError> {
        self.resolved(self.shared.media.select_mic(&id))
    }

    fn update_cam(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError> {
        self.resolved(self.shared.media.select_cam(&id))
    }

    fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        self.shared.media.selected_mic()
    }

    fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        self.shared.media.selected_cam()
    }

    fn enable_mic(&self, enable: bool) -> AsyncResult<(), SessionError> {
        self.shared.media.set_mic_enabled(enable);
        self.ok()
    }

    fn enable_cam(&self, enable: bool) -> AsyncResult<(), SessionError> {
        self.shared.media.set_cam_enabled(enable);
        self.ok()
    }

    fn is_mic_enabled(&self) -> bool {
        self.shared.media.is_mic_enabled()
    }

    fn is_cam_enabled(&self) -> bool {
        self.shared.media.is_cam_enabled()
    }

    fn tracks(&self) -> Tracks {
        self.shared.media.tracks()
    }
}

/// Bot half of an in-memory connection.
pub struct ChannelPeer {
    shared: Arc<ChannelShared>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl ChannelPeer {
    /// Next thing the client did.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    /// Next event, if one is already queued.
    pub fn try_next_event(&mut self) -> Option<PeerEvent> {
        self.events.try_recv().ok()
    }

    /// Next envelope of `msg_type`, skipping everything else.
    pub async fn next_message_of(&mut self, msg_type: &str) -> Option<OutboundEnvelope> {
        while let Some(event) = self.events.recv().await {
            if let PeerEvent::Message(msg) = event {
                if msg.msg_type == msg_type {
                    return Some(msg);
                }
                debug!(msg_type = %msg.msg_type, "peer skipped message");
            }
        }
        None
    }

    /// Whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Deliver an envelope to the client.
    pub fn send(&self, msg: InboundEnvelope) {
        match self.shared.tctx.get() {
            Some(tctx) => tctx.on_message(msg),
            None => warn!("peer send before transport initialize"),
        }
    }

    /// Deliver a raw text frame to the client.
    pub fn send_frame(&self, text: &str) {
        match self.shared.tctx.get() {
            Some(tctx) => tctx.on_frame(text),
            None => warn!("peer send before transport initialize"),
        }
    }

    /// Send `bot-ready`.
    pub fn bot_ready(&self) {
        self.send(InboundEnvelope::new(
            "bot-ready",
            None,
            json!({ "version": PROTOCOL_VERSION, "about": { "name": "channel-peer" } }),
        ));
    }

    /// Answer request `id` with `server-response`.
    pub fn respond(&self, id: &MessageId, data: Value) {
        self.send(InboundEnvelope::new("server-response", Some(id.clone()), data));
    }

    /// Answer request `id` with `error-response`.
    pub fn respond_error(&self, id: &MessageId, error: &str) {
        self.send(InboundEnvelope::new(
            "error-response",
            Some(id.clone()),
            json!({ "error": error }),
        ));
    }

    /// End the connection from the bot side.
    pub fn end_connection(&self) {
        let _ = self.shared.end();
    }

    /// Make the next `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: SessionError) {
        *self.shared.fail_next_connect.lock() = Some(error);
    }
}
