use crate::db::{
    Creator, PageQuery, PageWindow, PollDraft, PollId, PollStore, Upsert, UserId, VoteEvent,
};
use crate::error::PollError;
use crate::sse::{POLL_TOPIC, SyncEvent};
use crate::startup::AppState;
use crate::votes::VoterToken;
use axum::{
    extract::{Extension, Json, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use json_patch::Patch;
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

/// Session keys written by the authentication layer in front of this one.
pub const USER_ID_KEY: &str = "user_id";
pub const USERNAME_KEY: &str = "username";
/// Anonymous per-session token used by the server-side vote check.
pub const VOTER_KEY: &str = "voter_id";

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub vote: i64,
}

// Helper function to extract user_id from session
async fn get_user_id_from_session(session: &Session) -> Result<UserId, PollError> {
    session
        .get::<Uuid>(USER_ID_KEY)
        .await
        .map_err(|_| PollError::Unauthorized)?
        .ok_or(PollError::Unauthorized)
}

async fn current_creator(session: &Session) -> Result<Creator, PollError> {
    let id = get_user_id_from_session(session).await?;
    let name = session
        .get::<String>(USERNAME_KEY)
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    Ok(Creator { id, name })
}

async fn voter_token(session: &Session) -> Result<VoterToken, PollError> {
    if let Some(token) = session
        .get::<Uuid>(VOTER_KEY)
        .await
        .map_err(|e| PollError::DatabaseError(e.to_string()))?
    {
        return Ok(token);
    }
    let token = Uuid::new_v4();
    session
        .insert(VOTER_KEY, token)
        .await
        .map_err(|e| PollError::DatabaseError(e.to_string()))?;
    Ok(token)
}

fn publish<S: PollStore>(app_state: &AppState<S>, event: SyncEvent) {
    let delivered = app_state.broadcaster.publish(POLL_TOPIC, event.clone());
    debug!(event = event.name(), poll_id = %event.poll_id(), delivered, "published");
}

/// Recent polls, newest first
pub async fn list_polls<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, PollError> {
    let window = PageWindow::from_query(&query);
    let polls = app_state.store.list_recent(window).await?;
    Ok((StatusCode::OK, Json(polls)))
}

pub async fn get_poll<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.store.find_by_id(&PollId::from(poll_id)).await?;
    Ok((StatusCode::OK, Json(poll)))
}

/// Polls created by the caller
pub async fn my_polls<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    session: Session,
) -> Result<impl IntoResponse, PollError> {
    let user_id = get_user_id_from_session(&session).await?;
    let polls = app_state.store.list_by_creator(user_id).await?;
    Ok((StatusCode::OK, Json(polls)))
}

/// Create a new poll (authenticated users only)
pub async fn create_poll<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    session: Session,
    payload: Result<Json<PollDraft>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let creator = current_creator(&session).await?;
    let Json(draft) = payload?;
    draft.validate()?;

    let poll = app_state.store.insert(draft, creator).await?;
    info!(poll_id = %poll.id, options = poll.options.len(), "poll created");
    publish(&app_state, SyncEvent::created(poll.clone()));

    Ok((StatusCode::CREATED, Json(poll)))
}

/// Cast a vote on an option by position
pub async fn vote_on_poll<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    session: Session,
    Path(poll_id): Path<String>,
    payload: Result<Json<CastVoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let Json(request) = payload?;
    let option = usize::try_from(request.vote).map_err(|_| PollError::InvalidVoteIndex)?;
    let vote = VoteEvent::new(poll_id, option);
    let voter = get_user_id_from_session(&session).await.ok();

    let claim = match &app_state.ledger {
        Some(ledger) => Some(ledger.claim(voter_token(&session).await?, &vote.poll_id)?),
        None => None,
    };

    match app_state.aggregator.cast(&vote, voter).await {
        Ok(poll) => Ok((StatusCode::CREATED, Json(poll))),
        Err(e) => {
            if let (Some(ledger), Some(claim)) = (&app_state.ledger, &claim) {
                ledger.release(claim);
            }
            Err(e)
        }
    }
}

/// Replace a poll owned by the caller, or create it under this id
pub async fn update_poll<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    session: Session,
    Path(poll_id): Path<String>,
    payload: Result<Json<PollDraft>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let creator = current_creator(&session).await?;
    let Json(draft) = payload?;

    let outcome = app_state
        .store
        .upsert(&PollId::from(poll_id), draft, creator)
        .await?;

    let status = match &outcome {
        Upsert::Created(poll) => {
            info!(poll_id = %poll.id, "poll created by upsert");
            publish(&app_state, SyncEvent::created(poll.clone()));
            StatusCode::CREATED
        }
        Upsert::Updated(poll) => {
            publish(&app_state, SyncEvent::updated(poll.clone()));
            StatusCode::OK
        }
    };

    Ok((status, Json(outcome.poll().clone())))
}

/// JSON Patch (RFC 6902) against the poll's question and options, applied
/// to the stored state and validated before it is saved
pub async fn patch_poll<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    session: Session,
    Path(poll_id): Path<String>,
    payload: Result<Json<Patch>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let user_id = get_user_id_from_session(&session).await?;
    let Json(patch) = payload?;
    let poll_id = PollId::from(poll_id);

    let poll = app_state
        .store
        .patch(&poll_id, user_id, |draft| draft.patched(&patch))
        .await?;
    debug!(poll_id = %poll_id, ops = patch.0.len(), "poll patched");
    publish(&app_state, SyncEvent::updated(poll.clone()));

    Ok((StatusCode::OK, Json(poll)))
}

/// Delete a poll (only creator can delete)
pub async fn delete_poll<S: PollStore>(
    Extension(app_state): Extension<AppState<S>>,
    session: Session,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let user_id = get_user_id_from_session(&session).await?;
    let poll_id = PollId::from(poll_id);

    app_state.store.remove(&poll_id, user_id).await?;
    info!(poll_id = %poll_id, "poll removed");
    publish(&app_state, SyncEvent::removed(poll_id));

    Ok(StatusCode::NO_CONTENT)
}
