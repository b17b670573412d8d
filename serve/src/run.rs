//! `tools/call` for `onemcp.run`: spawn the orchestrator, stream progress as
//! SSE notifications, finish with one JSON-RPC result message.
//!
//! Flow: parse arguments → spawn run task with an event channel → pump
//! events into the SSE stream with the envelope injected → send the final
//! result (or error envelope). When the client disconnects, the SSE
//! receiver drops, the pump notices the failed send, and the request's
//! cancellation token stops in-flight LLM, compile, and bridge work.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stream_event::{EnvelopeState, RunEvent};

use crate::app::AppState;
use crate::mcp::{self, RpcMessage, RpcRequest, RunArgs};

const EVENT_QUEUE_CAPACITY: usize = 256;

pub(crate) async fn handle_run_call(state: Arc<AppState>, request: RpcRequest) -> Response {
    let name = request
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if name != mcp::RUN_TOOL {
        return Json(RpcMessage::error(
            request.id,
            -32602,
            format!("unknown tool `{name}`"),
        ))
        .into_response();
    }

    let args: RunArgs = match serde_json::from_value(
        request
            .params
            .get("arguments")
            .cloned()
            .unwrap_or_default(),
    ) {
        Ok(args) => args,
        Err(e) => {
            return Json(RpcMessage::error(
                request.id,
                -32602,
                format!("bad arguments: {e}"),
            ))
            .into_response()
        }
    };

    let run_id = format!("run-{}", Uuid::new_v4());
    let engine = state.engine();
    let cancel = CancellationToken::new();

    // Overall request timeout from options; independent of per-stage limits.
    if let Some(ms) = args.options.timeout_ms {
        let deadline_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            deadline_cancel.cancel();
        });
    }

    let (event_tx, event_rx) = mpsc::channel::<RunEvent>(EVENT_QUEUE_CAPACITY);
    let run_cancel = cancel.clone();
    let prompt = args.prompt.clone();
    let run_handle =
        tokio::spawn(async move { engine.run(&prompt, Some(event_tx), run_cancel).await });

    let (sse_tx, sse_rx) = mpsc::channel::<Result<Event, std::convert::Infallible>>(EVENT_QUEUE_CAPACITY);
    let request_id = request.id.clone();
    tokio::spawn(pump(
        run_id,
        request_id,
        event_rx,
        run_handle,
        sse_tx,
        cancel,
    ));

    Sse::new(ReceiverStream::new(sse_rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Forwards run events to the SSE channel and finishes with the JSON-RPC
/// result. A failed send means the client went away: cancel the run and
/// abort the task.
async fn pump(
    run_id: String,
    request_id: Option<serde_json::Value>,
    mut events: mpsc::Receiver<RunEvent>,
    run_handle: tokio::task::JoinHandle<Result<onemcp::RunOutcome, onemcp::OneMcpError>>,
    sse_tx: mpsc::Sender<Result<Event, std::convert::Infallible>>,
    cancel: CancellationToken,
) {
    let mut envelope = EnvelopeState::new(run_id.clone());

    while let Some(event) = events.recv().await {
        let Ok(json) = stream_event::to_json(&event, &mut envelope) else {
            continue;
        };
        let note = RpcMessage::notification("notifications/onemcp/run", json);
        let sse_event = Event::default()
            .event("message")
            .json_data(&note)
            .unwrap_or_default();
        if sse_tx.send(Ok(sse_event)).await.is_err() {
            tracing::warn!(run_id = %run_id, "client disconnected, cancelling run");
            cancel.cancel();
            run_handle.abort();
            let _ = run_handle.await;
            return;
        }
    }

    let result_message = match run_handle.await {
        Ok(Ok(outcome)) => RpcMessage::result(request_id, mcp::call_result_text(&outcome.summary)),
        Ok(Err(err)) => {
            let envelope_json = serde_json::to_value(&err)
                .unwrap_or_else(|_| serde_json::json!({"code": "EXECUTION"}));
            RpcMessage::result(request_id, mcp::call_result_error(&envelope_json))
        }
        Err(join_err) => RpcMessage::error(
            request_id,
            -32603,
            format!("run task failed: {join_err}"),
        ),
    };

    let sse_event = Event::default()
        .event("message")
        .json_data(&result_message)
        .unwrap_or_default();
    let _ = sse_tx.send(Ok(sse_event)).await;
}
