//! `/invoke` SSE stream
//!
//! Event contract: `append*` (message tokens) -> exactly one `plot_data`
//! -> `commit`. Errors surface as an `append*` + `commit` sequence with a
//! `Backend error: ...` message, preserving the protocol. A dropped
//! client closes the channel and the task stops at the next send.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use crate::api::InvokeRequest;
use crate::pipeline;
use crate::state::AppState;

const WORD_DELAY: Duration = Duration::from_millis(20);

type SseSender = mpsc::Sender<Result<Event, Infallible>>;

pub async fn invoke_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvokeRequest>,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_invoke(state, req, tx));
    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

async fn run_invoke(state: Arc<AppState>, req: InvokeRequest, tx: SseSender) {
    if let Err(e) = stream_response(&state, &req, &tx).await {
        error!(error = %e, "invoke pipeline failed");
        let msg = format!("Backend error: {e}");
        stream_words(&tx, &msg).await;
        send(&tx, Event::default().event("commit").data(".")).await;
    }
}

async fn stream_response(
    state: &Arc<AppState>,
    req: &InvokeRequest,
    tx: &SseSender,
) -> anyhow::Result<()> {
    let prompt = req.prompt().to_string();

    // Engine + routing run on a blocking thread; the stream starts once
    // the router has produced its message.
    let (prepared, response, route_ms) = {
        let state = state.clone();
        let req = req.clone();
        let prompt = prompt.clone();
        tokio::task::spawn_blocking(move || {
            let prepared = pipeline::prepare(&state, &req)?;
            let (response, route_ms) = pipeline::route(&prepared, &prompt);
            Ok::<_, anyhow::Error>((prepared, response, route_ms))
        })
        .await??
    };

    stream_words(tx, &response.message).await;

    let prepared = Arc::new(prepared);
    let finished = {
        let state_for_block = state.clone();
        let req = req.clone();
        let response = response.clone();
        let prepared_for_block = prepared.clone();
        tokio::task::spawn_blocking(move || {
            pipeline::finish(
                &state_for_block,
                &prepared_for_block,
                Some(&response),
                &req,
                route_ms,
            )
        })
        .await?
    };
    pipeline::record_telemetry(state, "/invoke", &prompt, &prepared, &finished);

    send(tx, Event::default().event("plot_data").data(finished.plot_json.clone())).await;

    // Make clipped highlights explicit in the conversation, not just in
    // the stats block.
    if finished.highlight_requested > 0 && finished.highlight_rendered < finished.highlight_requested
    {
        let note = format!(
            "(Note: matched {}, rendered {} due to LOD/budget/caps.)",
            finished.highlight_requested, finished.highlight_rendered
        );
        stream_words(tx, &note).await;
    }

    send(tx, Event::default().event("commit").data(".")).await;
    Ok(())
}

/// Emit a message word-by-word; newlines become standalone tokens so the
/// frontend can re-flow them.
async fn stream_words(tx: &SseSender, message: &str) {
    let spaced = message.replace('\n', " \n ");
    for word in spaced.split(' ').filter(|w| !w.is_empty()) {
        send(tx, Event::default().event("append").data(word)).await;
        tokio::time::sleep(WORD_DELAY).await;
    }
}

async fn send(tx: &SseSender, event: Event) {
    // A send failure means the client went away; the stream task unwinds
    // at the next send without any cleanup to do.
    let _ = tx.send(Ok(event)).await;
}
