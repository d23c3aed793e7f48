//! `POST /v1/messages`.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use kiro_gateway::{MessagesRequest, StreamEvent};

use crate::error::Result;
use crate::AppState;

pub async fn handle_messages(
    State(state): State<AppState>,
    Json(request): Json<MessagesRequest>,
) -> Result<Response> {
    if request.stream {
        let cancel = state.shutdown.child_token();
        let stream = state.orchestrator.handle_stream(request, cancel).await?;

        let sse_stream = stream.map(|event| {
            let name = event_name(&event);
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Ok::<Event, Infallible>(Event::default().event(name).data(data))
        });

        Ok(Sse::new(sse_stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let response = state.orchestrator.handle(request).await?;
        Ok(Json(response).into_response())
    }
}

fn event_name(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Ping => "ping",
        StreamEvent::Error { .. } => "error",
    }
}
