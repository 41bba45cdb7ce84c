use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use rex::{
    models::{event::CanonicalEvent, message::Message},
    normalizer::EventStream,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Time allowed for backend teardown once the response is over.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// Server-sent events body fed by the forwarding task
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

// Wire format of the event stream
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_content(text: &str) -> String {
        format!("data: {}\n\n", json!({ "content": text }))
    }

    fn format_done() -> String {
        "data: [DONE]\n\n".to_string()
    }

    fn format_event(event: &CanonicalEvent) -> String {
        match event {
            CanonicalEvent::ContentDelta(text) => Self::format_content(text),
            CanonicalEvent::Done => Self::format_done(),
        }
    }
}

fn parse_messages(body: Option<Json<Value>>) -> Result<Vec<Message>, ApiError> {
    let body = body.map(|Json(body)| body);
    let messages = body.as_ref().and_then(|body| body.get("messages"));
    Ok(Message::parse_list(messages)?)
}

/// Copy events into the response channel until `Done` or disconnect.
///
/// A closed channel means the client is gone and the token is cancelled.
/// Either way the stream is drained afterwards so the backend finishes its
/// teardown (grace wait or kill, then reaping) before the task ends.
async fn forward(mut events: EventStream, tx: mpsc::Sender<String>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = tx.closed() => None,
            event = events.next() => match event {
                Some(event) => Some(event),
                None => return,
            },
        };

        let Some(event) = event else {
            info!("client disconnected, cancelling backend stream");
            cancel.cancel();
            break;
        };
        let done = event.is_done();
        if tx.send(ProtocolFormatter::format_event(&event)).await.is_err() {
            info!("client disconnected, cancelling backend stream");
            cancel.cancel();
            break;
        }
        if done {
            break;
        }
    }

    // The response ends here; teardown continues without holding the client.
    drop(tx);
    let drained = timeout(TEARDOWN_TIMEOUT, async {
        while events.next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("backend teardown exceeded {:?}, dropping it", TEARDOWN_TIMEOUT);
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<SseResponse, ApiError> {
    let messages = parse_messages(body)?;
    debug!("chat request with {} messages", messages.len());

    let cancel = CancellationToken::new();
    let events = state.gateway.handle_stream(messages, cancel.clone()).await?;

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(forward(events, tx, cancel));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    content: String,
}

async fn sync_handler(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Json<SyncResponse>, ApiError> {
    let messages = parse_messages(body)?;
    let content = state.gateway.handle_sync(messages).await?;
    Ok(Json(SyncResponse { content }))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/sync", post(sync_handler))
        .with_state(state)
}
