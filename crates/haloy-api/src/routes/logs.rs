//! Server-Sent-Events log streams.
//!
//! Each event is one JSON `LogEntry` per `data:` line. A keepalive comment
//! goes out immediately on connect and every 30 seconds after. Deployment
//! streams end once the terminal entry has been delivered; the global
//! stream runs until the client disconnects.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderName, header};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::StreamExt;
use futures::stream::{self, Stream};
use tracing::warn;

use haloy_broker::{LogBroker, LogStream};
use haloy_core::id::DeploymentId;
use haloy_core::log::LogEntry;

use crate::error::ApiError;
use crate::state::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

type SseEvent = Result<Event, Infallible>;

fn sse_headers() -> [(HeaderName, &'static str); 3] {
    [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ]
}

fn entry_event(entry: &LogEntry) -> Option<Event> {
    match Event::default().json_data(entry) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "dropping unserializable log entry");
            None
        }
    }
}

/// Follows one deployment; releases its broker slot when dropped.
struct DeploymentFollow {
    stream: LogStream,
    broker: Arc<LogBroker>,
    id: DeploymentId,
}

impl Drop for DeploymentFollow {
    fn drop(&mut self) {
        self.broker.release_deployment(&self.id, &self.stream);
    }
}

/// Follows the global topic; unsubscribes when dropped.
struct GeneralFollow {
    stream: LogStream,
    broker: Arc<LogBroker>,
    subscriber_id: u64,
}

impl Drop for GeneralFollow {
    fn drop(&mut self) {
        self.broker.unsubscribe_general(self.subscriber_id);
    }
}

pub async fn deployment_logs(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = DeploymentId::parse(&deployment_id)?;
    let follow = DeploymentFollow {
        stream: state.broker.subscribe_deployment(&id),
        broker: Arc::clone(&state.broker),
        id,
    };

    let entries = stream::unfold(Some(follow), |state| async move {
        let mut follow = state?;
        loop {
            let entry = follow.stream.recv().await?;
            let terminal = entry.is_terminal();
            let Some(event) = entry_event(&entry) else {
                continue;
            };
            let next = if terminal { None } else { Some(follow) };
            return Some((Ok::<_, Infallible>(event), next));
        }
    });

    Ok((sse_headers(), sse_response(entries)))
}

pub async fn all_logs(State(state): State<AppState>) -> impl IntoResponse {
    let (stream, subscriber_id) = state.broker.subscribe_general();
    let follow = GeneralFollow {
        stream,
        broker: Arc::clone(&state.broker),
        subscriber_id,
    };

    let entries = stream::unfold(Some(follow), |state| async move {
        let mut follow = state?;
        loop {
            let entry = follow.stream.recv().await?;
            let Some(event) = entry_event(&entry) else {
                continue;
            };
            return Some((Ok::<_, Infallible>(event), Some(follow)));
        }
    });

    (sse_headers(), sse_response(entries))
}

/// Wrap a log event stream with the immediate and periodic keepalives.
fn sse_response(
    entries: impl Stream<Item = SseEvent> + Send + 'static,
) -> Sse<impl Stream<Item = SseEvent>> {
    let hello = stream::once(async { Ok(Event::default().comment("keepalive")) });
    Sse::new(hello.chain(entries)).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}
