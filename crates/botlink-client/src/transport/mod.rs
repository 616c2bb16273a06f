//! Transport capability interface.
//!
//! A transport carries envelopes to and from the bot and owns local media.
//! It reports back to the engine only through its [`TransportContext`]:
//! state changes, inbound messages, and the end of a connection. Those
//! reports may come from any thread; the context marshals them onto the
//! client's execution context.

pub mod channel;
mod media;
pub mod websocket;

pub use channel::{ChannelPeer, ChannelTransport, PeerEvent};
pub use media::LocalMedia;
pub use websocket::WebSocketTransport;

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::warn;

use botlink_core::protocol::{InboundEnvelope, OutboundEnvelope};
use botlink_core::types::{MediaDeviceId, MediaDeviceInfo, Tracks};
use botlink_core::{AsyncResult, ExecutionContext, SessionError, TransportState};

use crate::client::{ClientInner, ClientOptions};
use crate::dispatch;

/// A swappable connection to the bot.
pub trait Transport: Send + Sync {
    /// Bind to the client. Called once, before anything else.
    fn initialize(&self, ctx: TransportContext);

    /// Prepare local media devices.
    fn init_devices(&self) -> AsyncResult<(), SessionError>;

    /// Free all resources. The transport is not used afterwards.
    fn release(&self);

    /// Connect using transport-specific parameters.
    ///
    /// Resolves once the transport is connected; the bot may not be ready yet.
    fn connect(&self, params: Value) -> AsyncResult<(), SessionError>;

    /// Close the connection. The end is reported through
    /// [`TransportContext::on_connection_end`].
    fn disconnect(&self) -> AsyncResult<(), SessionError>;

    /// Deliver one envelope to the bot.
    fn send_message(&self, msg: OutboundEnvelope) -> AsyncResult<(), SessionError>;

    /// Available microphones.
    fn available_mics(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError>;

    /// Available cameras.
    fn available_cams(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError>;

    /// Switch microphone.
    fn update_mic(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError>;

    /// Switch camera.
    fn update_cam(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError>;

    /// Currently selected microphone.
    fn selected_mic(&self) -> Option<MediaDeviceInfo>;

    /// Currently selected camera.
    fn selected_cam(&self) -> Option<MediaDeviceInfo>;

    /// Turn the microphone on or off.
    fn enable_mic(&self, enable: bool) -> AsyncResult<(), SessionError>;

    /// Turn the camera on or off.
    fn enable_cam(&self, enable: bool) -> AsyncResult<(), SessionError>;

    /// Whether the microphone is on.
    fn is_mic_enabled(&self) -> bool;

    /// Whether the camera is on.
    fn is_cam_enabled(&self) -> bool;

    /// Media tracks of the session.
    fn tracks(&self) -> Tracks;
}

/// The engine side of a transport.
#[derive(Clone)]
pub struct TransportContext {
    ctx: ExecutionContext,
    runtime: Handle,
    options: Arc<ClientOptions>,
    client: Weak<ClientInner>,
}

impl TransportContext {
    pub(crate) fn new(
        ctx: ExecutionContext,
        runtime: Handle,
        options: Arc<ClientOptions>,
        client: Weak<ClientInner>,
    ) -> Self {
        Self {
            ctx,
            runtime,
            options,
            client,
        }
    }

    /// The client's execution context.
    pub fn execution_context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Runtime for the transport's I/O tasks.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Client options.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Last published state.
    pub fn state(&self) -> TransportState {
        self.client
            .upgrade()
            .map_or(TransportState::Disconnected, |c| c.state())
    }

    /// Publish a new state.
    pub fn set_state(&self, state: TransportState) {
        self.with_client(move |client| client.apply_state(state));
    }

    /// Hand an inbound envelope to the dispatcher.
    pub fn on_message(&self, msg: InboundEnvelope) {
        self.with_client(move |client| dispatch::dispatch(client, msg));
    }

    /// Parse a JSON text frame and dispatch it.
    ///
    /// Malformed frames are reported as backend errors.
    pub fn on_frame(&self, text: &str) {
        match InboundEnvelope::from_json(text) {
            Ok(msg) => self.on_message(msg),
            Err(e) => {
                warn!(error = %e, "discarding malformed frame");
                self.with_client(move |client| {
                    client.callbacks().on_backend_error(&format!("malformed message: {e}"));
                });
            }
        }
    }

    /// Report that the connection has ended.
    pub fn on_connection_end(&self) {
        self.with_client(ClientInner::handle_connection_end);
    }

    /// The `client-ready` envelope to send once connected.
    pub fn client_ready_message(&self) -> OutboundEnvelope {
        OutboundEnvelope::client_ready(&self.options.client_info)
    }

    fn with_client(&self, f: impl FnOnce(&Arc<ClientInner>) + Send + 'static) {
        let client = self.client.clone();
        let _ = self.ctx.run(move || {
            if let Some(client) = client.upgrade() {
                f(&client);
            }
        });
    }
}
