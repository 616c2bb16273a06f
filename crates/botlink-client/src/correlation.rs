//! Request/response correlation table.
//!
//! Maps an outbound message id to the result its response will settle. Every
//! operation must run on the owning execution context.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error};

use botlink_core::protocol::NO_CORRELATION_ID;
use botlink_core::{AsyncResult, ExecutionContext, MessageId, SessionError};

/// Pending requests keyed by message id.
pub struct ResponseWaiters {
    ctx: ExecutionContext,
    pending: HashMap<MessageId, AsyncResult<Value, SessionError>>,
}

impl ResponseWaiters {
    /// An empty table bound to `ctx`.
    pub fn new(ctx: &ExecutionContext) -> Self {
        Self {
            ctx: ctx.clone(),
            pending: HashMap::new(),
        }
    }

    /// Register `id` and return the result its response will settle.
    ///
    /// The caller guarantees `id` is not already pending.
    pub fn wait_for(&mut self, id: MessageId) -> AsyncResult<Value, SessionError> {
        self.ctx.assert_current();
        let result = AsyncResult::pending(&self.ctx);
        debug_assert!(!self.pending.contains_key(&id), "duplicate request id {id}");
        let _ = self.pending.insert(id, result.clone());
        result
    }

    /// Settle the request for `id` with `data`. Returns whether one was pending.
    pub fn resolve(&mut self, id: &MessageId, data: Value) -> bool {
        match self.take(id) {
            Some(result) => result.resolve_ok(data),
            None => false,
        }
    }

    /// Fail the request for `id`. Returns whether one was pending.
    pub fn reject(&mut self, id: &MessageId, error: SessionError) -> bool {
        match self.take(id) {
            Some(result) => result.resolve_err(error),
            None => false,
        }
    }

    /// Cancel every pending request. Returns how many were cancelled.
    pub fn clear_all(&mut self) -> usize {
        self.ctx.assert_current();
        let count = self.pending.len();
        for (_, result) in self.pending.drain() {
            let _ = result.resolve_err(SessionError::OperationCancelled);
        }
        if count > 0 {
            debug!(count, "cancelled pending requests");
        }
        count
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    fn take(&mut self, id: &MessageId) -> Option<AsyncResult<Value, SessionError>> {
        self.ctx.assert_current();
        if id.as_str() == NO_CORRELATION_ID {
            return None;
        }
        let result = self.pending.remove(id);
        if result.is_none() {
            error!(id = %id, "received response for unknown id");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botlink_core::ContextLocal;
    use botlink_core::logging::capture_logs;
    use serde_json::json;
    use std::sync::Arc;
    use tracing::Level;

    struct Fixture {
        ctx: ExecutionContext,
        table: Arc<ContextLocal<ResponseWaiters>>,
    }

    impl Fixture {
        fn new() -> Self {
            let ctx = ExecutionContext::spawn("correlation-test").unwrap();
            let table = Arc::new(ContextLocal::new(&ctx, ResponseWaiters::new(&ctx)));
            Self { ctx, table }
        }

        async fn with<R: Send + 'static>(
            &self,
            f: impl FnOnce(&mut ResponseWaiters) -> R + Send + 'static,
        ) -> R {
            let table = Arc::clone(&self.table);
            self.ctx.call(move || table.with(f)).await.unwrap()
        }
    }

    #[tokio::test]
    async fn resolve_settles_once() {
        let fx = Fixture::new();
        let id = MessageId::from_raw("X");

        let i = id.clone();
        let pending = fx.with(move |t| t.wait_for(i)).await;

        let i = id.clone();
        let (first, second, len) = fx
            .with(move |t| {
                let first = t.resolve(&i, json!({"t": "ok"}));
                let second = t.reject(&i, SessionError::OperationCancelled);
                (first, second, t.len())
            })
            .await;

        assert!(first);
        assert!(!second);
        assert_eq!(len, 0);
        assert_eq!(pending.wait().await, Ok(json!({"t": "ok"})));
    }

    #[tokio::test]
    async fn unknown_id_is_logged_and_ignored() {
        let fx = Fixture::new();
        let (resolved, rejected, errors, len) = fx
            .with(|t| {
                let (logs, _guard) = capture_logs();
                let _ = t.wait_for(MessageId::from_raw("known"));
                let resolved = t.resolve(&MessageId::from_raw("nope"), json!(1));
                let rejected =
                    t.reject(&MessageId::from_raw("nope"), SessionError::OperationCancelled);
                (resolved, rejected, logs.count_at_level(Level::ERROR), t.len())
            })
            .await;

        assert!(!resolved);
        assert!(!rejected);
        assert_eq!(errors, 2);
        assert_eq!(len, 1);
    }

    #[tokio::test]
    async fn sentinel_id_is_silent() {
        let fx = Fixture::new();
        let errors = fx
            .with(|t| {
                let (logs, _guard) = capture_logs();
                let _ = t.resolve(&MessageId::from_raw(NO_CORRELATION_ID), json!(null));
                logs.count_at_level(Level::ERROR)
            })
            .await;
        assert_eq!(errors, 0);
    }

    #[tokio::test]
    async fn clear_all_cancels_everything() {
        let fx = Fixture::new();
        let (a, b) = fx
            .with(|t| {
                (
                    t.wait_for(MessageId::from_raw("a")),
                    t.wait_for(MessageId::from_raw("b")),
                )
            })
            .await;

        let (cleared, empty, late) = fx
            .with(|t| {
                let cleared = t.clear_all();
                let late = t.resolve(&MessageId::from_raw("a"), json!(1));
                (cleared, t.is_empty(), late)
            })
            .await;

        assert_eq!(cleared, 2);
        assert!(empty);
        assert!(!late);
        assert_eq!(a.wait().await, Err(SessionError::OperationCancelled));
        assert_eq!(b.wait().await, Err(SessionError::OperationCancelled));
    }

    #[tokio::test]
    async fn reject_carries_error() {
        let fx = Fixture::new();
        let pending = fx.with(|t| t.wait_for(MessageId::from_raw("X"))).await;
        let contained = fx
            .with(|t| {
                let before = t.contains(&MessageId::from_raw("X"));
                let _ = t.reject(
                    &MessageId::from_raw("X"),
                    SessionError::ErrorResponse("E".into()),
                );
                before
            })
            .await;
        assert!(contained);
        assert_eq!(pending.wait().await, Err(SessionError::ErrorResponse("E".into())));
    }
}
