//! Bot-initiated function calls.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use botlink_client::{AsyncFunctionCallHandler, FunctionCallReply};
use botlink_core::MessageId;
use botlink_core::protocol::InboundEnvelope;
use botlink_core::types::{LlmFunctionCallData, LlmFunctionCallResult};

use common::{Event, Harness};

fn call_envelope(id: &str, function: &str, args: Value) -> InboundEnvelope {
    InboundEnvelope::new(
        "llm-function-call",
        Some(MessageId::from_raw(id)),
        json!({"function_name": function, "tool_call_id": format!("tc-{id}"), "args": args}),
    )
}

#[tokio::test]
async fn inline_handler_round_trip() {
    let mut h = Harness::new();
    h.client
        .register_function_call_handler(
            "get_weather",
            |call: LlmFunctionCallData, reply: FunctionCallReply| {
                let city = call.args["city"].as_str().unwrap_or_default().to_string();
                reply.send(json!({"city": city, "temp": 3}));
            },
        )
        .wait()
        .await
        .unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "get_weather", json!({"city": "Oslo"})));
    let sent = h.peer_message("llm-function-call-result").await;
    assert_eq!(sent.id.as_str(), "fc1");

    let result: LlmFunctionCallResult = sent.decode().unwrap();
    assert_eq!(
        result,
        LlmFunctionCallResult {
            function_name: "get_weather".into(),
            tool_call_id: "tc-fc1".into(),
            arguments: json!({"city": "Oslo"}),
            result: json!({"city": "Oslo", "temp": 3}),
        }
    );

    let events = h.drain().await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::FunctionCall(c) if c.function_name == "get_weather"))
    );
}

#[tokio::test]
async fn result_after_connection_end_is_dropped() {
    let mut h = Harness::new();
    let parked: Arc<Mutex<Option<FunctionCallReply>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&parked);
    h.client
        .register_function_call_handler(
            "foo",
            move |_call: LlmFunctionCallData, reply: FunctionCallReply| {
                *slot.lock() = Some(reply);
            },
        )
        .wait()
        .await
        .unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "foo", json!({})));
    h.settle().await;
    let reply = parked.lock().take().expect("handler was not invoked");

    h.peer.end_connection();
    h.settle().await;
    h.connect_ready().await;

    reply.send(json!("late"));
    assert!(h.queued_messages("llm-function-call-result").await.is_empty());
}

#[tokio::test]
async fn result_sent_later_on_same_connection_is_delivered() {
    let mut h = Harness::new();
    let parked: Arc<Mutex<Option<FunctionCallReply>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&parked);
    h.client
        .register_function_call_handler(
            "foo",
            move |_call: LlmFunctionCallData, reply: FunctionCallReply| {
                *slot.lock() = Some(reply);
            },
        )
        .wait()
        .await
        .unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "foo", json!({})));
    h.settle().await;
    let reply = parked.lock().take().expect("handler was not invoked");

    std::thread::spawn(move || reply.send(json!("from another thread")))
        .join()
        .unwrap();
    let sent = h.peer_message("llm-function-call-result").await;
    let result: LlmFunctionCallResult = sent.decode().unwrap();
    assert_eq!(result.result, json!("from another thread"));
}

#[tokio::test]
async fn no_handler_means_no_reply() {
    let mut h = Harness::new();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "unknown", json!({})));
    let events = h.drain().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::FunctionCall(c) if c.function_name == "unknown"));
    assert!(h.queued_messages("llm-function-call-result").await.is_empty());
}

#[tokio::test]
async fn panicking_handler_is_reported_as_backend_error() {
    let mut h = Harness::new();
    h.client
        .register_function_call_handler(
            "boom",
            |_call: LlmFunctionCallData, _reply: FunctionCallReply| {
                panic!("handler blew up");
            },
        )
        .wait()
        .await
        .unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "boom", json!({})));
    h.peer.send(InboundEnvelope::new("metrics", None, json!({"x": 1})));
    let events = h.drain().await;

    assert_eq!(events.len(), 3, "{events:?}");
    assert!(matches!(&events[0], Event::FunctionCall(c) if c.function_name == "boom"));
    assert_matches!(
        &events[1],
        Event::BackendError(message)
            if message.contains("llm-function-call") && message.contains("handler blew up")
    );
    assert_eq!(events[2], Event::Metrics(json!({"x": 1})));
}

#[tokio::test]
async fn unregistered_handler_is_not_invoked() {
    let mut h = Harness::new();
    h.client
        .register_function_call_handler(
            "foo",
            |_call: LlmFunctionCallData, reply: FunctionCallReply| {
                reply.send(json!(1));
            },
        )
        .wait()
        .await
        .unwrap();
    h.client.unregister_function_call_handler("foo").wait().await.unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "foo", json!({})));
    assert!(h.queued_messages("llm-function-call-result").await.is_empty());
}

#[tokio::test]
async fn unregister_all_clears_every_handler() {
    let mut h = Harness::new();
    for name in ["a", "b"] {
        h.client
            .register_function_call_handler(
                name,
                |_call: LlmFunctionCallData, reply: FunctionCallReply| {
                    reply.send(json!(1));
                },
            )
            .wait()
            .await
            .unwrap();
    }
    h.client.unregister_all_function_call_handlers().wait().await.unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "a", json!({})));
    h.peer.send(call_envelope("fc2", "b", json!({})));
    assert!(h.queued_messages("llm-function-call-result").await.is_empty());
}

struct Doubler;

#[async_trait]
impl AsyncFunctionCallHandler for Doubler {
    async fn handle(&self, call: LlmFunctionCallData) -> Value {
        tokio::task::yield_now().await;
        json!(call.args["n"].as_i64().unwrap_or_default() * 2)
    }
}

#[tokio::test]
async fn async_handler_round_trip() {
    let mut h = Harness::new();
    h.client
        .register_async_function_call_handler("double", Doubler)
        .wait()
        .await
        .unwrap();
    h.connect_ready().await;

    h.peer.send(call_envelope("fc1", "double", json!({"n": 21})));
    let sent = h.peer_message("llm-function-call-result").await;
    let result: LlmFunctionCallResult = sent.decode().unwrap();
    assert_eq!(result.result, json!(42));
    assert_eq!(result.tool_call_id, "tc-fc1");
}

#[tokio::test]
async fn call_without_id_gets_fresh_result_id() {
    let mut h = Harness::new();
    h.client
        .register_function_call_handler(
            "foo",
            |_call: LlmFunctionCallData, reply: FunctionCallReply| {
                reply.send(Value::Null);
            },
        )
        .wait()
        .await
        .unwrap();
    h.connect_ready().await;

    h.peer.send(InboundEnvelope::new(
        "llm-function-call",
        None,
        json!({"function_name": "foo", "tool_call_id": "tc", "args": {}}),
    ));
    let sent = h.peer_message("llm-function-call-result").await;
    assert!(sent.id.as_str().starts_with("msg_"));
}
