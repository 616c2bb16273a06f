//! Connection lifecycle.
//!
//! At most one [`Connection`] exists at a time. It is created when `connect`
//! is accepted and cleared when the transport reports the connection ended.
//! Its ready gate settles when the bot reports ready, or fails with
//! `OperationCancelled` if the connection ends first.

use tracing::{debug, warn};

use botlink_core::{AsyncResult, ConnectionId, ExecutionContext, SessionError, TransportState};

/// One accepted connection attempt.
#[derive(Clone, Debug)]
pub struct Connection {
    /// Identity used to detect stale work after a reconnect.
    pub id: ConnectionId,
    /// Settles once the bot is ready.
    pub ready: AsyncResult<(), SessionError>,
}

/// Holder of the current connection, if any.
#[derive(Default)]
pub struct ConnectionSlot {
    current: Option<Connection>,
}

impl ConnectionSlot {
    /// Create a connection, unless one already exists.
    pub fn accept(&mut self, ctx: &ExecutionContext) -> Result<Connection, SessionError> {
        if self.current.is_some() {
            return Err(SessionError::PreviousConnectionStillActive);
        }
        let connection = Connection {
            id: ConnectionId::new(),
            ready: AsyncResult::pending(ctx),
        };
        debug!(connection = %connection.id, "connection accepted");
        self.current = Some(connection.clone());
        Ok(connection)
    }

    /// Resolve the ready gate. Returns `true` only the first time per connection.
    pub fn mark_ready(&mut self) -> bool {
        match &self.current {
            Some(connection) => connection.ready.resolve_ok(()),
            None => {
                warn!("bot ready without an active connection");
                false
            }
        }
    }

    /// Clear the connection, cancelling its ready gate if still pending.
    pub fn end(&mut self) -> Option<Connection> {
        let connection = self.current.take()?;
        let _ = connection.ready.resolve_err(SessionError::OperationCancelled);
        debug!(connection = %connection.id, "connection cleared");
        Some(connection)
    }

    /// Clear the connection only if it is `id`, failing its gate with `error`.
    pub fn abandon(&mut self, id: &ConnectionId, error: SessionError) -> bool {
        if self.current_id().as_ref() != Some(id) {
            return false;
        }
        if let Some(connection) = self.current.take() {
            let _ = connection.ready.resolve_err(error);
        }
        true
    }

    /// Identity of the current connection.
    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current.as_ref().map(|c| c.id.clone())
    }

    /// Whether a connection exists.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }
}

/// Check that authorization may start from `actual`.
pub fn check_can_authorize(actual: TransportState) -> Result<(), SessionError> {
    if actual.is_busy() {
        return Err(SessionError::InvalidState {
            expected: TransportState::Initialized,
            actual,
        });
    }
    Ok(())
}
