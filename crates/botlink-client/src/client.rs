//! Session engine.
//!
//! [`BotClient`] is the public surface. Every operation is marshalled onto the
//! client's [`ExecutionContext`]: called from the context it runs inline,
//! called from anywhere else it is queued and the returned [`AsyncResult`]
//! settles once the queued job has run. The correlation table, the current
//! connection and the handler registries live in a [`ContextLocal`] and are
//! only ever touched from that thread.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use botlink_core::protocol::OutboundEnvelope;
use botlink_core::types::{
    AppendToContextResultData, ClientInfo, DataMessage, LlmContextMessage, MediaDeviceId,
    MediaDeviceInfo, SendTextOptions, Tracks,
};
use botlink_core::{
    AsyncResult, ConnectionId, ContextLocal, ExecutionContext, MessageId, SessionError,
    TransportState,
};
use botlink_settings::ClientSettings;

use crate::auth::{AuthClient, AuthRequest};
use crate::callbacks::EventCallbacks;
use crate::correlation::ResponseWaiters;
use crate::function_call::{
    AsyncFunctionCallHandler, FunctionCallHandler, FunctionCallRegistry, RegisteredHandler,
};
use crate::helper::{ClientHelper, HelperRegistry};
use crate::lifecycle::{ConnectionSlot, check_can_authorize};
use crate::transport::{Transport, TransportContext};

/// Client configuration.
#[derive(Clone)]
pub struct ClientOptions {
    /// Receives session events.
    pub callbacks: Arc<dyn EventCallbacks>,
    /// Start with the microphone enabled.
    pub enable_mic: bool,
    /// Start with the camera enabled.
    pub enable_cam: bool,
    /// Sent to the bot in `client-ready`.
    pub client_info: ClientInfo,
    /// Transport URL used when connect parameters carry none.
    pub transport_url: Option<String>,
    /// Outbound queue capacity for transports that buffer.
    pub send_queue: usize,
    /// Name of the execution context thread.
    pub context_name: String,
    /// HTTP client for the bot start request.
    pub auth: AuthClient,
}

impl ClientOptions {
    /// Defaults: microphone on, camera off.
    pub fn new(callbacks: Arc<dyn EventCallbacks>) -> Self {
        Self {
            callbacks,
            enable_mic: true,
            enable_cam: false,
            client_info: ClientInfo::default(),
            transport_url: None,
            send_queue: 256,
            context_name: "botlink".to_string(),
            auth: AuthClient::default(),
        }
    }

    /// Options taken from loaded settings.
    pub fn from_settings(settings: &ClientSettings, callbacks: Arc<dyn EventCallbacks>) -> Self {
        Self {
            enable_mic: settings.media.enable_mic,
            enable_cam: settings.media.enable_cam,
            transport_url: settings.transport.url.clone(),
            send_queue: settings.transport.send_queue,
            ..Self::new(callbacks)
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("enable_mic", &self.enable_mic)
            .field("enable_cam", &self.enable_cam)
            .field("client_info", &self.client_info)
            .field("transport_url", &self.transport_url)
            .field("send_queue", &self.send_queue)
            .field("context_name", &self.context_name)
            .finish_non_exhaustive()
    }
}

/// State confined to the execution context.
pub(crate) struct SessionCore {
    pub(crate) waiters: ResponseWaiters,
    pub(crate) lifecycle: ConnectionSlot,
    pub(crate) functions: FunctionCallRegistry,
    pub(crate) helpers: HelperRegistry,
}

pub(crate) struct ClientInner {
    pub(crate) ctx: ExecutionContext,
    pub(crate) runtime: Handle,
    pub(crate) session: ContextLocal<SessionCore>,
    transport: Arc<dyn Transport>,
    options: Arc<ClientOptions>,
    state: watch::Sender<TransportState>,
}

// Transport calls and user callbacks never run inside `session.with`: they
// may re-enter the client, which would borrow the session again.
impl ClientInner {
    pub(crate) fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub(crate) fn callbacks(&self) -> &dyn EventCallbacks {
        self.options.callbacks.as_ref()
    }

    pub(crate) fn apply_state(&self, state: TransportState) {
        let previous = self.state.send_replace(state);
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "transport state changed");
        self.callbacks().on_transport_state_changed(state);
        if state == TransportState::Connected {
            self.callbacks().on_connected();
        }
    }

    pub(crate) fn handle_connection_end(self: &Arc<Self>) {
        let (cancelled, ended) = self
            .session
            .with(|s| (s.waiters.clear_all(), s.lifecycle.end()));
        match ended {
            Some(connection) => info!(connection = %connection.id, cancelled, "connection ended"),
            None => info!(cancelled, "connection ended"),
        }
        self.apply_state(TransportState::Disconnected);
        self.callbacks().on_disconnected();
    }

    pub(crate) fn deliver_function_result(
        &self,
        connection: Option<&ConnectionId>,
        envelope: OutboundEnvelope,
    ) {
        let current = self.session.with(|s| s.lifecycle.current_id());
        match connection {
            Some(id) if current.as_ref() == Some(id) => {
                let _ = self
                    .transport
                    .send_message(envelope)
                    .with_error_callback(|e| {
                        warn!(error = %e, "failed to send function call result");
                    });
            }
            _ => debug!(id = %envelope.id, "connection changed, dropping function call result"),
        }
    }

    fn start_bot(self: &Arc<Self>, request: AuthRequest) -> AsyncResult<Value, SessionError> {
        if let Err(e) = check_can_authorize(self.state()) {
            warn!(error = %e, "cannot start bot");
            return AsyncResult::resolved_err(&self.ctx, e);
        }
        self.apply_state(TransportState::Authorizing);

        let result = AsyncResult::pending(&self.ctx);
        let out = result.clone();
        let auth = self.options.auth.clone();
        let _ = self.runtime.spawn(async move {
            out.resolve(auth.authorize(&request).await);
        });

        let weak = Arc::downgrade(self);
        result.with_callback(move |r| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.state() != TransportState::Authorizing {
                debug!(state = %inner.state(), "authorization settled after state moved on");
                return;
            }
            match r {
                Ok(_) => inner.apply_state(TransportState::Authorized),
                Err(e) => {
                    warn!(error = %e, "bot start failed");
                    inner.apply_state(TransportState::Disconnected);
                }
            }
        })
    }

    fn connect(self: &Arc<Self>, params: Value) -> AsyncResult<(), SessionError> {
        let connection = match self.session.with(|s| s.lifecycle.accept(&self.ctx)) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "connect rejected");
                return AsyncResult::resolved_err(&self.ctx, e);
            }
        };
        info!(connection = %connection.id, "connecting");

        let weak = Arc::downgrade(self);
        let id = connection.id;
        let ready = connection.ready;
        self.transport
            .connect(params)
            .with_error_callback(move |e| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                warn!(connection = %id, error = %e, "transport connect failed");
                if inner.session.with(|s| s.lifecycle.abandon(&id, e.clone())) {
                    inner.apply_state(TransportState::Disconnected);
                }
            })
            .chain(move |()| ready)
    }

    fn request(self: &Arc<Self>, envelope: OutboundEnvelope) -> AsyncResult<Value, SessionError> {
        let id = envelope.id.clone();
        let response = self.session.with(|s| s.waiters.wait_for(id.clone()));
        let weak = Arc::downgrade(self);
        let _ = self
            .transport
            .send_message(envelope)
            .with_error_callback(move |e| {
                if let Some(inner) = weak.upgrade() {
                    let _ = inner.session.with(|s| s.waiters.reject(&id, e.clone()));
                }
            });
        response
    }

    fn register_function(&self, name: String, handler: RegisteredHandler) {
        let replaced = self.session.with(|s| s.functions.register(name.clone(), handler));
        debug!(function = %name, replaced, "function call handler registered");
    }

    fn release(&self) {
        let (cancelled, handlers) = self.session.with(|s| {
            let cancelled = s.waiters.clear_all();
            let _ = s.lifecycle.end();
            (cancelled, s.functions.clear())
        });
        self.transport.release();
        self.apply_state(TransportState::Disconnected);
        info!(cancelled, handlers, "client released");
        self.ctx.shutdown();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.ctx.shutdown();
    }
}

/// Client for one bot session at a time.
///
/// Cheap to clone; clones share the session. Must be created inside a tokio
/// runtime, which runs authorization and async function handlers.
#[derive(Clone)]
pub struct BotClient {
    inner: Arc<ClientInner>,
}

impl BotClient {
    /// Bind `transport` to a new execution context.
    pub fn new(
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current()
            .map_err(|e| SessionError::other(format!("no tokio runtime: {e}")))?;
        let ctx = ExecutionContext::spawn(options.context_name.clone())
            .map_err(|e| SessionError::other(format!("failed to start execution context: {e}")))?;

        let session = ContextLocal::new(
            &ctx,
            SessionCore {
                waiters: ResponseWaiters::new(&ctx),
                lifecycle: ConnectionSlot::default(),
                functions: FunctionCallRegistry::default(),
                helpers: HelperRegistry::default(),
            },
        );
        let options = Arc::new(options);
        let (state, _) = watch::channel(TransportState::Disconnected);
        let inner = Arc::new(ClientInner {
            ctx: ctx.clone(),
            runtime: runtime.clone(),
            session,
            transport: Arc::clone(&transport),
            options: Arc::clone(&options),
            state,
        });

        transport.initialize(TransportContext::new(
            ctx,
            runtime,
            options,
            Arc::downgrade(&inner),
        ));
        debug!(context = inner.ctx.name(), "client created");
        Ok(Self { inner })
    }

    /// The context all callbacks run on.
    pub fn execution_context(&self) -> &ExecutionContext {
        &self.inner.ctx
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        self.inner.state()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.inner.state.subscribe()
    }

    fn on_context<T, F>(&self, f: F) -> AsyncResult<T, SessionError>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Arc<ClientInner>) -> AsyncResult<T, SessionError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.ctx.run_returning(move || f(&inner))
    }

    /// Prepare local media devices.
    pub fn init_devices(&self) -> AsyncResult<(), SessionError> {
        self.on_context(|inner| inner.transport.init_devices())
    }

    /// POST the start request and return the connect parameters it yields.
    ///
    /// Fails with `InvalidState` while authorization or a connection is
    /// underway.
    pub fn start_bot(&self, request: AuthRequest) -> AsyncResult<Value, SessionError> {
        self.on_context(move |inner| inner.start_bot(request))
    }

    /// Connect with transport-specific parameters.
    ///
    /// Resolves once the bot reports ready. Fails with
    /// `PreviousConnectionStillActive` if a connection already exists, and
    /// with `OperationCancelled` if the connection ends before the bot is
    /// ready.
    pub fn connect(&self, params: Value) -> AsyncResult<(), SessionError> {
        self.on_context(move |inner| inner.connect(params))
    }

    /// [`start_bot`](Self::start_bot) followed by [`connect`](Self::connect)
    /// with the returned parameters.
    pub fn start_bot_and_connect(&self, request: AuthRequest) -> AsyncResult<Value, SessionError> {
        self.on_context(move |inner| {
            let next = Arc::clone(inner);
            inner.start_bot(request).chain(move |params| {
                let returned = params.clone();
                next.connect(params).map(move |()| returned)
            })
        })
    }

    /// Close the transport connection.
    pub fn disconnect(&self) -> AsyncResult<(), SessionError> {
        self.on_context(|inner| {
            info!("disconnecting");
            inner.transport.disconnect()
        })
    }

    /// Ask the bot to end the session.
    pub fn disconnect_bot(&self) -> AsyncResult<(), SessionError> {
        self.on_context(|inner| {
            inner
                .transport
                .send_message(OutboundEnvelope::disconnect_bot())
                .with_error_callback(|e| warn!(error = %e, "failed to send disconnect-bot"))
        })
    }

    /// Send an application message without waiting for a response.
    pub fn send_client_message(
        &self,
        msg_type: impl Into<String>,
        data: Value,
    ) -> AsyncResult<(), SessionError> {
        let msg_type = msg_type.into();
        self.on_context(move |inner| {
            inner
                .transport
                .send_message(OutboundEnvelope::client_message(MessageId::new(), msg_type, data))
        })
    }

    /// Send an application message and wait for the server's response.
    pub fn send_client_request(
        &self,
        msg_type: impl Into<String>,
        data: Value,
    ) -> AsyncResult<DataMessage, SessionError> {
        let msg_type = msg_type.into();
        self.on_context(move |inner| {
            inner
                .request(OutboundEnvelope::client_message(MessageId::new(), msg_type, data))
                .map_to_result(|data| Ok(serde_json::from_value(data)?))
        })
    }

    /// Send text for the bot to respond to.
    pub fn send_text(
        &self,
        content: impl Into<String>,
        options: &SendTextOptions,
    ) -> AsyncResult<(), SessionError> {
        let envelope = OutboundEnvelope::send_text(content, options);
        self.on_context(move |inner| inner.transport.send_message(envelope))
    }

    /// Append a message to the bot's LLM context.
    #[deprecated(note = "use send_text")]
    pub fn append_to_context(
        &self,
        message: LlmContextMessage,
    ) -> AsyncResult<AppendToContextResultData, SessionError> {
        self.on_context(move |inner| {
            inner
                .request(OutboundEnvelope::append_to_context(MessageId::new(), &message))
                .map_to_result(|data| Ok(serde_json::from_value(data)?))
        })
    }

    /// Handle calls to function `name`, replacing any previous handler.
    pub fn register_function_call_handler(
        &self,
        name: impl Into<String>,
        handler: impl FunctionCallHandler + 'static,
    ) -> AsyncResult<(), SessionError> {
        let name = name.into();
        let handler = RegisteredHandler::Inline(Arc::new(handler));
        self.on_context(move |inner| {
            inner.register_function(name, handler);
            AsyncResult::resolved_ok(&inner.ctx, ())
        })
    }

    /// Handle calls to function `name` with an async handler run on the tokio
    /// runtime.
    pub fn register_async_function_call_handler(
        &self,
        name: impl Into<String>,
        handler: impl AsyncFunctionCallHandler + 'static,
    ) -> AsyncResult<(), SessionError> {
        let name = name.into();
        let handler = RegisteredHandler::Spawned(Arc::new(handler));
        self.on_context(move |inner| {
            inner.register_function(name, handler);
            AsyncResult::resolved_ok(&inner.ctx, ())
        })
    }

    /// Stop handling calls to function `name`.
    pub fn unregister_function_call_handler(
        &self,
        name: impl Into<String>,
    ) -> AsyncResult<(), SessionError> {
        let name = name.into();
        self.on_context(move |inner| {
            if !inner.session.with(|s| s.functions.unregister(&name)) {
                debug!(function = %name, "no handler to unregister");
            }
            AsyncResult::resolved_ok(&inner.ctx, ())
        })
    }

    /// Stop handling all function calls.
    pub fn unregister_all_function_call_handlers(&self) -> AsyncResult<(), SessionError> {
        self.on_context(|inner| {
            let count = inner.session.with(|s| s.functions.clear());
            debug!(count, "function call handlers cleared");
            AsyncResult::resolved_ok(&inner.ctx, ())
        })
    }

    /// Route the helper's message types to it.
    pub fn register_helper(&self, helper: Arc<dyn ClientHelper>) -> AsyncResult<(), SessionError> {
        self.on_context(move |inner| {
            let name = helper.name().to_string();
            let result = inner.session.with(|s| s.helpers.register(helper));
            if result.is_ok() {
                debug!(helper = %name, "helper registered");
            }
            AsyncResult::resolved(&inner.ctx, result)
        })
    }

    /// Remove a helper. Fails with `HelperNotRegistered` if it is unknown.
    pub fn unregister_helper(&self, name: impl Into<String>) -> AsyncResult<(), SessionError> {
        let name = name.into();
        self.on_context(move |inner| {
            let result = inner.session.with(|s| s.helpers.unregister(&name));
            AsyncResult::resolved(&inner.ctx, result)
        })
    }

    /// Microphones the transport can use.
    pub fn available_mics(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError> {
        self.on_context(|inner| inner.transport.available_mics())
    }

    /// Cameras the transport can use.
    pub fn available_cams(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError> {
        self.on_context(|inner| inner.transport.available_cams())
    }

    /// Switch to microphone `id`.
    pub fn update_mic(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError> {
        self.on_context(move |inner| inner.transport.update_mic(id))
    }

    /// Switch to camera `id`.
    pub fn update_cam(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError> {
        self.on_context(move |inner| inner.transport.update_cam(id))
    }

    /// Microphone in use, if any.
    pub fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        self.inner.transport.selected_mic()
    }

    /// Camera in use, if any.
    pub fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        self.inner.transport.selected_cam()
    }

    /// Turn the microphone on or off.
    pub fn enable_mic(&self, enable: bool) -> AsyncResult<(), SessionError> {
        self.on_context(move |inner| inner.transport.enable_mic(enable))
    }

    /// Turn the camera on or off.
    pub fn enable_cam(&self, enable: bool) -> AsyncResult<(), SessionError> {
        self.on_context(move |inner| inner.transport.enable_cam(enable))
    }

    /// Whether the microphone is on.
    pub fn is_mic_enabled(&self) -> bool {
        self.inner.transport.is_mic_enabled()
    }

    /// Whether the camera is on.
    pub fn is_cam_enabled(&self) -> bool {
        self.inner.transport.is_cam_enabled()
    }

    /// Media tracks of the session.
    pub fn tracks(&self) -> Tracks {
        self.inner.transport.tracks()
    }

    /// Cancel pending work, release the transport and stop the execution
    /// context. The client is unusable afterwards.
    pub fn release(&self) {
        let inner = Arc::clone(&self.inner);
        if !self.inner.ctx.run(move || inner.release()) {
            debug!("client already released");
        }
    }
}

impl fmt::Debug for BotClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotClient")
            .field("context", &self.inner.ctx.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
