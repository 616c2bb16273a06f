//! Inbound message dispatch.
//!
//! Routes each envelope to the correlation table, the connection lifecycle,
//! the function-call registry, or an application callback. A message that
//! fails to decode, or whose handler panics, is reported through
//! `on_backend_error` and does not affect the messages after it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use botlink_core::context::panic_message;
use botlink_core::protocol::{InboundEnvelope, InboundType};
use botlink_core::types::{BotReadyData, BotText, ErrorData, LlmFunctionCallData};
use botlink_core::{SessionError, TransportState};

use crate::client::ClientInner;
use crate::function_call::FunctionCallReply;

/// Handle one inbound envelope. Runs on the execution context.
pub(crate) fn dispatch(inner: &Arc<ClientInner>, msg: InboundEnvelope) {
    inner.ctx.assert_current();
    trace!(msg_type = %msg.msg_type, id = ?msg.id, "inbound message");

    let error = match panic::catch_unwind(AssertUnwindSafe(|| route(inner, &msg))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
    };
    warn!(msg_type = %msg.msg_type, error = %error, "failed to handle message");
    inner
        .callbacks()
        .on_backend_error(&format!("failed to handle '{}': {error}", msg.msg_type));
}

fn route(inner: &Arc<ClientInner>, msg: &InboundEnvelope) -> Result<(), SessionError> {
    let Some(kind) = msg.kind() else {
        let helper = inner.session.with(|s| s.helpers.find(&msg.msg_type));
        match helper {
            Some(helper) => helper.handle_message(msg),
            None => warn!(msg_type = %msg.msg_type, "unexpected message type"),
        }
        return Ok(());
    };
    let callbacks = inner.callbacks();

    match kind {
        // Responses
        InboundType::ErrorResponse => error_response(inner, msg)?,
        InboundType::ServerResponse
        | InboundType::AppendToContextResult
        | InboundType::Config
        | InboundType::ConfigAvailable
        | InboundType::ActionsAvailable
        | InboundType::ActionResponse => {
            let id = msg
                .id
                .as_ref()
                .ok_or_else(|| SessionError::Decode("response without id".into()))?;
            let _ = inner.session.with(|s| s.waiters.resolve(id, msg.data.clone()));
        }

        // Lifecycle
        InboundType::BotReady => {
            let data: BotReadyData = msg.decode()?;
            inner.apply_state(TransportState::Ready);
            if inner.session.with(|s| s.lifecycle.mark_ready()) {
                info!(version = %data.version, "bot ready");
                callbacks.on_bot_ready(&data);
            }
        }
        InboundType::Error => {
            let data: ErrorData = msg.decode()?;
            if data.fatal {
                warn!(error = %data.error, "fatal backend error");
            }
            callbacks.on_backend_error(&data.error);
        }

        // Transcripts
        InboundType::UserTranscription => callbacks.on_user_transcript(&msg.decode()?),
        InboundType::BotTranscription | InboundType::TtsText => {
            let data: BotText = msg.decode()?;
            callbacks.on_bot_transcript(&data.text);
        }

        // Speaking
        InboundType::UserStartedSpeaking => callbacks.on_user_started_speaking(),
        InboundType::UserStoppedSpeaking => callbacks.on_user_stopped_speaking(),
        InboundType::BotStartedSpeaking => callbacks.on_bot_started_speaking(),
        InboundType::BotStoppedSpeaking => callbacks.on_bot_stopped_speaking(),

        // Pipeline
        InboundType::BotLlmText => callbacks.on_bot_llm_text(&msg.decode()?),
        InboundType::BotLlmStarted => callbacks.on_bot_llm_started(),
        InboundType::BotLlmStopped => callbacks.on_bot_llm_stopped(),
        InboundType::BotTtsText => callbacks.on_bot_tts_text(&msg.decode()?),
        InboundType::BotTtsStarted => callbacks.on_bot_tts_started(),
        InboundType::BotTtsStopped => callbacks.on_bot_tts_stopped(),
        InboundType::BotLlmSearchResponse => callbacks.on_bot_llm_search_response(&msg.decode()?),

        // Application
        InboundType::ServerMessage => callbacks.on_server_message(&msg.data),
        InboundType::Metrics => callbacks.on_metrics(&msg.data),
        InboundType::StorageItemStored => callbacks.on_storage_item_stored(&msg.decode()?),
        InboundType::LlmFunctionCall => function_call(inner, msg)?,
    }
    Ok(())
}

fn error_response(inner: &Arc<ClientInner>, msg: &InboundEnvelope) -> Result<(), SessionError> {
    let data: ErrorData = msg.decode()?;
    match &msg.id {
        Some(id) => {
            let _ = inner
                .session
                .with(|s| s.waiters.reject(id, SessionError::ErrorResponse(data.error)));
        }
        None => inner.callbacks().on_backend_error(&data.error),
    }
    Ok(())
}

fn function_call(inner: &Arc<ClientInner>, msg: &InboundEnvelope) -> Result<(), SessionError> {
    let call: LlmFunctionCallData = msg.decode()?;
    inner.callbacks().on_llm_function_call(&call);

    let (handler, connection) = inner.session.with(|s| {
        (
            s.functions.get(&call.function_name),
            s.lifecycle.current_id(),
        )
    });
    let Some(handler) = handler else {
        debug!(function = %call.function_name, "no handler registered");
        return Ok(());
    };

    debug!(
        function = %call.function_name,
        tool_call_id = %call.tool_call_id,
        "invoking function call handler"
    );
    let reply = FunctionCallReply::new(
        Arc::downgrade(inner),
        connection,
        msg.id.clone(),
        call.clone(),
    );
    handler.invoke(call, reply, &inner.runtime);
    Ok(())
}
