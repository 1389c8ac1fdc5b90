use crate::db::{PollId, PollStore};
use crate::error::PollError;
use crate::sse::all_polls_sse::{keep_alive, sync_event};
use crate::sse::models::{POLL_TOPIC, SyncEvent};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;

/// Live feed for a single poll. Ends after the poll is removed.
pub async fn poll_updates_sse<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    Path(poll_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let poll_id = PollId::from(poll_id);
    let mut subscription = app_state.broadcaster.subscribe(POLL_TOPIC);

    let stream = async_stream::stream! {
        match app_state.store.find_by_id(&poll_id).await {
            Ok(poll) => {
                yield Ok(Event::default()
                    .event("init")
                    .data(json!({"poll": poll}).to_string()));
            }
            Err(PollError::NotFound) => {
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Poll not found"}).to_string()));
                return;
            }
            Err(e) => {
                warn!(poll_id = %poll_id, "failed to load poll for live feed: {}", e);
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Database error"}).to_string()));
                return;
            }
        }

        while let Some(event) = subscription.recv().await {
            if event.poll_id() != &poll_id {
                continue;
            }
            if let Some(sse) = sync_event(&event) {
                yield Ok(sse);
            }
            if matches!(event, SyncEvent::Removed { .. }) {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}
