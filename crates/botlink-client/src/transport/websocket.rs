//! JSON-over-WebSocket transport.
//!
//! Each envelope is one text frame. The connection runs as a single tokio
//! task with a reader half and a writer half; the writer also sends a
//! periodic ping. Outbound frames go through a bounded queue, and a full
//! queue fails the send instead of blocking the execution context.
//! `disconnect` during the handshake cancels the connect attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use botlink_core::protocol::OutboundEnvelope;
use botlink_core::types::{MediaDeviceId, MediaDeviceInfo, Tracks};
use botlink_core::{AsyncResult, SessionError, TransportState};

use super::{LocalMedia, Transport, TransportContext};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connection slot shared with the connection task. Each connect attempt
/// carries a number so a finished attempt never touches a newer one.
#[derive(Default)]
enum Link {
    #[default]
    Idle,
    Connecting {
        attempt: u64,
        cancel: oneshot::Sender<()>,
    },
    Open {
        attempt: u64,
        tx: mpsc::Sender<String>,
    },
}

impl Link {
    fn attempt(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Connecting { attempt, .. } | Self::Open { attempt, .. } => Some(*attempt),
        }
    }
}

type SharedLink = Arc<Mutex<Link>>;

/// Reset `link` to idle if it still belongs to `attempt`.
fn clear_if_current(link: &Mutex<Link>, attempt: u64) -> bool {
    let mut link = link.lock();
    if link.attempt() == Some(attempt) {
        *link = Link::Idle;
        true
    } else {
        false
    }
}

/// Transport speaking the envelope protocol over a WebSocket.
///
/// `connect` takes `{"url": "ws://..."}`; without a `url` it falls back to
/// the client's configured transport URL. The transport has no media stack,
/// so device operations only track selection state.
#[derive(Default)]
pub struct WebSocketTransport {
    tctx: OnceLock<TransportContext>,
    link: SharedLink,
    attempts: AtomicU64,
    media: LocalMedia,
}

impl WebSocketTransport {
    /// New, unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn tctx(&self) -> &TransportContext {
        match self.tctx.get() {
            Some(tctx) => tctx,
            None => panic!("websocket transport used before initialize"),
        }
    }

    fn resolved<T>(&self, result: Result<T, SessionError>) -> AsyncResult<T, SessionError>
    where
        T: Clone + Send + 'static,
    {
        AsyncResult::resolved(self.tctx().execution_context(), result)
    }
}

impl Transport for WebSocketTransport {
    fn initialize(&self, ctx: TransportContext) {
        let options = ctx.options();
        self.media.set_mic_enabled(options.enable_mic);
        self.media.set_cam_enabled(options.enable_cam);
        if self.tctx.set(ctx).is_err() {
            warn!("websocket transport initialized twice");
        }
    }

    fn init_devices(&self) -> AsyncResult<(), SessionError> {
        let tctx = self.tctx();
        tctx.set_state(TransportState::Initializing);
        tctx.set_state(TransportState::Initialized);
        self.resolved(Ok(()))
    }

    fn release(&self) {
        match std::mem::take(&mut *self.link.lock()) {
            Link::Idle => {}
            Link::Connecting { cancel, .. } => {
                let _ = cancel.send(());
                debug!("websocket released while connecting");
            }
            Link::Open { .. } => debug!("websocket released while connected"),
        }
    }

    fn connect(&self, params: Value) -> AsyncResult<(), SessionError> {
        let tctx = self.tctx().clone();
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| tctx.options().transport_url.clone());
        let Some(url) = url else {
            return self.resolved(Err(SessionError::transport("no websocket url")));
        };
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        {
            let mut link = self.link.lock();
            if !matches!(*link, Link::Idle) {
                return self.resolved(Err(SessionError::transport("already connected")));
            }
            *link = Link::Connecting { attempt, cancel };
        }

        tctx.set_state(TransportState::Connecting);
        let result = AsyncResult::pending(tctx.execution_context());
        let out = result.clone();
        let link = Arc::clone(&self.link);
        let runtime = tctx.runtime().clone();
        let _ = runtime.spawn(async move {
            let handshake = tokio::select! {
                r = connect_async(url.as_str()) => r,
                _ = cancelled => {
                    info!(url = %url, "websocket connect cancelled");
                    out.resolve_err(SessionError::OperationCancelled);
                    tctx.on_connection_end();
                    return;
                }
            };
            let mut stream = match handshake {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(url = %url, error = %e, "websocket connect failed");
                    let _ = clear_if_current(&link, attempt);
                    tctx.set_state(TransportState::Error);
                    out.resolve_err(SessionError::transport(e.to_string()));
                    return;
                }
            };

            let (tx, rx) = mpsc::channel(tctx.options().send_queue.max(1));
            match serde_json::to_string(&tctx.client_ready_message()) {
                Ok(frame) => {
                    let _ = tx.try_send(frame);
                }
                Err(e) => warn!(error = %e, "failed to encode client-ready"),
            }
            let opened = {
                let mut link = link.lock();
                if link.attempt() == Some(attempt) {
                    *link = Link::Open { attempt, tx };
                    true
                } else {
                    false
                }
            };
            if !opened {
                info!(url = %url, "websocket disconnected during handshake");
                let _ = stream.close(None).await;
                out.resolve_err(SessionError::OperationCancelled);
                tctx.on_connection_end();
                return;
            }
            info!(url = %url, "websocket connected");
            tctx.set_state(TransportState::Connected);
            out.resolve_ok(());

            run_connection(stream, rx, &tctx).await;

            let _ = clear_if_current(&link, attempt);
            info!(url = %url, "websocket closed");
            tctx.on_connection_end();
        });
        result
    }

    fn disconnect(&self) -> AsyncResult<(), SessionError> {
        match std::mem::take(&mut *self.link.lock()) {
            Link::Idle => debug!("disconnect while not connected"),
            Link::Connecting { cancel, .. } => {
                let _ = cancel.send(());
            }
            // Dropping the queue's sender closes the socket.
            Link::Open { .. } => {}
        }
        self.resolved(Ok(()))
    }

    fn send_message(&self, msg: OutboundEnvelope) -> AsyncResult<(), SessionError> {
        let frame = match serde_json::to_string(&msg) {
            Ok(frame) => frame,
            Err(e) => return self.resolved(Err(e.into())),
        };
        let tx = match &*self.link.lock() {
            Link::Open { tx, .. } => tx.clone(),
            _ => return self.resolved(Err(SessionError::transport("not connected"))),
        };
        let result = match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(
                    msg_type = %msg.msg_type,
                    frame_len = frame.len(),
                    "send queue full, dropping message"
                );
                Err(SessionError::transport("send queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SessionError::transport("connection closed"))
            }
        };
        self.resolved(result)
    }

    fn available_mics(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError> {
        self.resolved(Ok(self.media.mics()))
    }

    fn available_cams(&self) -> AsyncResult<Vec<MediaDeviceInfo>, SessionError> {
        self.resolved(Ok(self.media.cams()))
    }

    fn update_mic(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError> {
        self.resolved(self.media.select_mic(&id))
    }

    fn update_cam(&self, id: MediaDeviceId) -> AsyncResult<(), SessionError> {
        self.resolved(self.media.select_cam(&id))
    }

    fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        self.media.selected_mic()
    }

    fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        self.media.selected_cam()
    }

    fn enable_mic(&self, enable: bool) -> AsyncResult<(), SessionError> {
        self.media.set_mic_enabled(enable);
        self.resolved(Ok(()))
    }

    fn enable_cam(&self, enable: bool) -> AsyncResult<(), SessionError> {
        self.media.set_cam_enabled(enable);
        self.resolved(Ok(()))
    }

    fn is_mic_enabled(&self) -> bool {
        self.media.is_mic_enabled()
    }

    fn is_cam_enabled(&self) -> bool {
        self.media.is_cam_enabled()
    }

    fn tracks(&self) -> Tracks {
        self.media.tracks()
    }
}

/// Pump frames until either side stops. Dropping the queue's last sender
/// closes the socket.
async fn run_connection(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx: mpsc::Receiver<String>,
    tctx: &TransportContext,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();

    let writer = async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!("sent ping");
                }
            }
        }
    };

    let reader = async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => tctx.on_frame(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "websocket read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = writer => {},
        () = reader => {},
    }
}
