use crate::db::{PageQuery, PageWindow, PollStore};
use crate::sse::models::{POLL_TOPIC, SyncEvent};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Query},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};

pub(crate) fn sync_event(event: &SyncEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().event(event.name()).data(data)),
        Err(e) => {
            error!(poll_id = %event.poll_id(), "failed to encode sync event: {}", e);
            None
        }
    }
}

pub(crate) fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(30))
        .text("keep-alive")
}

/// Live feed for the listing page: one `init` event with the requested
/// window, then every created/updated/removed event on the poll topic.
pub async fn all_polls_sse<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    Query(query): Query<PageQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // subscribe before the initial read so nothing falls between the two
    let mut subscription = app_state.broadcaster.subscribe(POLL_TOPIC);
    let window = PageWindow::from_query(&query);

    let stream = async_stream::stream! {
        match app_state.store.list_recent(window).await {
            Ok(polls) => {
                yield Ok(Event::default()
                    .event("init")
                    .data(json!({"polls": polls}).to_string()));
            }
            Err(e) => {
                warn!("failed to load polls for live feed: {}", e);
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Failed to load polls"}).to_string()));
            }
        }

        while let Some(event) = subscription.recv().await {
            if let Some(sse) = sync_event(&event) {
                yield Ok(sse);
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}
