//! # botlink-core
//!
//! Foundation types for the botlink session engine.
//!
//! - **Execution context**: [`ExecutionContext`] is the single-consumer job queue that
//!   owns all mutable session state; [`ContextLocal`] confines a value to it
//! - **Async results**: [`AsyncResult`] is a single-resolution promise bound to a context,
//!   with `map` / `map_err` / `chain` combinators and post-hoc callbacks
//! - **Branded IDs**: [`MessageId`], [`ConnectionId`] newtypes
//! - **Errors**: [`SessionError`] kinds reported through every public operation
//! - **Protocol**: inbound/outbound envelopes and their payload types

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod result;
pub mod types;

pub use context::{ContextLocal, ExecutionContext};
pub use errors::{Abandoned, SessionError};
pub use ids::{ConnectionId, MessageId};
pub use result::AsyncResult;
pub use types::TransportState;
