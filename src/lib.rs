//! Live poll voting: concurrent-safe vote aggregation and real-time
//! synchronization of poll lifecycle events to connected observers.
//!
//! - [`db`] owns polls: the [`db::PollStore`] contract with a Postgres and an
//!   in-memory implementation, plus listing windows.
//! - [`votes`] applies single votes with bounded conflict retry and keeps the
//!   server-side duplicate vote ledger.
//! - [`sse`] is the pub/sub hub and the Server-Sent Events feeds built on it.
//! - [`client`] holds the client-side follower and duplicate vote guard.
//! - [`polls`] and [`router`] expose it all over HTTP.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod polls;
pub mod sse;
pub mod startup;
pub mod votes;

use crate::db::PollStore;
use crate::startup::AppState;
use axum::{
    Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};

/// All poll routes with the state attached. Session and CORS layers are
/// added by the caller.
pub fn router<S: PollStore>(app_state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/polls",
            get(polls::list_polls::<S>).post(polls::create_poll::<S>),
        )
        .route("/polls/mypolls", get(polls::my_polls::<S>))
        .route("/polls/events", get(sse::all_polls_sse::<S>))
        .route("/polls/vote/:id", put(polls::vote_on_poll::<S>))
        .route(
            "/polls/:id",
            get(polls::get_poll::<S>)
                .put(polls::update_poll::<S>)
                .patch(polls::patch_poll::<S>)
                .delete(polls::delete_poll::<S>),
        )
        .route("/polls/:id/events", get(sse::poll_updates_sse::<S>))
        .layer(Extension(app_state))
        .fallback(handler_404)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
