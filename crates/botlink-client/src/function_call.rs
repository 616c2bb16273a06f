//! Bot-initiated function calls.
//!
//! When the bot sends `llm-function-call`, the handler registered under the
//! function name is invoked with a [`FunctionCallReply`]. The reply may be
//! sent at any later time, from any thread. It is delivered only if the
//! connection that received the call is still the current one; a result for
//! a connection that has since ended is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use botlink_core::protocol::OutboundEnvelope;
use botlink_core::types::{LlmFunctionCallData, LlmFunctionCallResult};
use botlink_core::{ConnectionId, MessageId};

use crate::client::ClientInner;

/// Handles a function call and eventually answers through the reply.
pub trait FunctionCallHandler: Send + Sync {
    /// Invoked on the execution context. Must not block.
    fn handle(&self, call: LlmFunctionCallData, reply: FunctionCallReply);
}

impl<F> FunctionCallHandler for F
where
    F: Fn(LlmFunctionCallData, FunctionCallReply) + Send + Sync,
{
    fn handle(&self, call: LlmFunctionCallData, reply: FunctionCallReply) {
        self(call, reply);
    }
}

/// Handles a function call asynchronously on the tokio runtime.
#[async_trait]
pub trait AsyncFunctionCallHandler: Send + Sync {
    /// Produce the result sent back to the bot.
    async fn handle(&self, call: LlmFunctionCallData) -> Value;
}

#[derive(Clone)]
pub(crate) enum RegisteredHandler {
    Inline(Arc<dyn FunctionCallHandler>),
    Spawned(Arc<dyn AsyncFunctionCallHandler>),
}

impl RegisteredHandler {
    pub(crate) fn invoke(
        self,
        call: LlmFunctionCallData,
        reply: FunctionCallReply,
        runtime: &Handle,
    ) {
        match self {
            Self::Inline(handler) => handler.handle(call, reply),
            Self::Spawned(handler) => {
                let _ = runtime.spawn(async move {
                    let result = handler.handle(call).await;
                    reply.send(result);
                });
            }
        }
    }
}

/// Handlers keyed by function name.
#[derive(Default)]
pub(crate) struct FunctionCallRegistry {
    handlers: HashMap<String, RegisteredHandler>,
}

impl FunctionCallRegistry {
    /// Register a handler, replacing any previous one. Returns whether one was replaced.
    pub(crate) fn register(&mut self, name: String, handler: RegisteredHandler) -> bool {
        self.handlers.insert(name, handler).is_some()
    }

    pub(crate) fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.handlers.len();
        self.handlers.clear();
        count
    }

    pub(crate) fn get(&self, name: &str) -> Option<RegisteredHandler> {
        self.handlers.get(name).cloned()
    }

    #[cfg(test)]
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Continuation for one function call.
pub struct FunctionCallReply {
    client: Weak<ClientInner>,
    connection: Option<ConnectionId>,
    msg_id: Option<MessageId>,
    call: LlmFunctionCallData,
}

impl FunctionCallReply {
    pub(crate) fn new(
        client: Weak<ClientInner>,
        connection: Option<ConnectionId>,
        msg_id: Option<MessageId>,
        call: LlmFunctionCallData,
    ) -> Self {
        Self {
            client,
            connection,
            msg_id,
            call,
        }
    }

    /// The call being answered.
    pub fn call(&self) -> &LlmFunctionCallData {
        &self.call
    }

    /// Send `result` to the bot if the originating connection is still current.
    pub fn send(self, result: Value) {
        let Some(client) = self.client.upgrade() else {
            debug!(
                function = %self.call.function_name,
                "client released, dropping function call result"
            );
            return;
        };
        let ctx = client.ctx.clone();
        let _ = ctx.run(move || {
            let envelope = result_envelope(self.msg_id, &self.call, result);
            client.deliver_function_result(self.connection.as_ref(), envelope);
        });
    }
}

impl fmt::Debug for FunctionCallReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCallReply")
            .field("connection", &self.connection)
            .field("msg_id", &self.msg_id)
            .field("function", &self.call.function_name)
            .finish_non_exhaustive()
    }
}

/// Build the `llm-function-call-result` envelope for `call`.
///
/// Reuses the call's message id, or generates one if the call had none.
pub(crate) fn result_envelope(
    msg_id: Option<MessageId>,
    call: &LlmFunctionCallData,
    result: Value,
) -> OutboundEnvelope {
    OutboundEnvelope::llm_function_call_result(
        msg_id.unwrap_or_default(),
        &LlmFunctionCallResult {
            function_name: call.function_name.clone(),
            tool_call_id: call.tool_call_id.clone(),
            arguments: call.args.clone(),
            result,
        },
    )
}
