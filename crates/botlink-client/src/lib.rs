//! # botlink-client
//!
//! Session engine for a real-time bot connection.
//!
//! - **Client**: [`BotClient`] authorizes, connects, sends messages and
//!   requests, and tracks the connection lifecycle
//! - **Correlation**: [`ResponseWaiters`] settles each request with its response
//! - **Lifecycle**: [`ConnectionSlot`] holds the current connection and its ready gate
//! - **Function calls**: handlers answer bot-initiated calls through a [`FunctionCallReply`]
//! - **Transports**: the [`Transport`] capability, with in-memory and WebSocket variants
//!
//! All callbacks run on the client's execution context, one at a time.

#![deny(unsafe_code)]

pub mod auth;
pub mod callbacks;
pub mod client;
pub mod correlation;
mod dispatch;
pub mod function_call;
pub mod helper;
pub mod lifecycle;
pub mod transport;

pub use auth::{AuthClient, AuthRequest};
pub use callbacks::{EventCallbacks, NoopCallbacks};
pub use client::{BotClient, ClientOptions};
pub use correlation::ResponseWaiters;
pub use function_call::{AsyncFunctionCallHandler, FunctionCallHandler, FunctionCallReply};
pub use helper::ClientHelper;
pub use lifecycle::{Connection, ConnectionSlot};
pub use transport::{
    ChannelPeer, ChannelTransport, PeerEvent, Transport, TransportContext, WebSocketTransport,
};
