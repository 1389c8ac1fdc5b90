use crate::db::models::{Creator, Poll, PollDraft, PollId, PollSummary, UserId};
use crate::db::pagination::PageWindow;
use crate::error::PollError;
use std::future::Future;

/// Outcome of a create-or-replace write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Created(Poll),
    Updated(Poll),
}

impl Upsert {
    pub fn poll(&self) -> &Poll {
        match self {
            Upsert::Created(poll) | Upsert::Updated(poll) => poll,
        }
    }
}

/// Sole owner of durable polls.
///
/// `increment_vote` must never lose a concurrent increment. An implementation
/// either increments in place at the storage layer or does a versioned
/// compare-and-swap and reports [`PollError::Conflict`] when it loses the
/// race, leaving the retry to the caller.
pub trait PollStore: Clone + Send + Sync + 'static {
    fn find_by_id(&self, id: &PollId) -> impl Future<Output = Result<Poll, PollError>> + Send;

    /// Newest first, creator reduced to its name.
    fn list_recent(
        &self,
        window: PageWindow,
    ) -> impl Future<Output = Result<Vec<PollSummary>, PollError>> + Send;

    fn list_by_creator(
        &self,
        creator: UserId,
    ) -> impl Future<Output = Result<Vec<Poll>, PollError>> + Send;

    fn insert(
        &self,
        draft: PollDraft,
        creator: Creator,
    ) -> impl Future<Output = Result<Poll, PollError>> + Send;

    fn increment_vote(
        &self,
        id: &PollId,
        index: usize,
        voter: Option<UserId>,
    ) -> impl Future<Output = Result<Poll, PollError>> + Send;

    /// Replaces question and options of a poll owned by `caller`.
    fn edit(
        &self,
        id: &PollId,
        draft: PollDraft,
        caller: UserId,
    ) -> impl Future<Output = Result<Poll, PollError>> + Send;

    /// Read-modify-write edit of a poll owned by `caller`. `apply` receives
    /// the stored draft and runs inside the same write section as the save,
    /// so no other edit can land in between.
    fn patch<F>(
        &self,
        id: &PollId,
        caller: UserId,
        apply: F,
    ) -> impl Future<Output = Result<Poll, PollError>> + Send
    where
        F: FnOnce(PollDraft) -> Result<PollDraft, PollError> + Send;

    /// Creates the poll under `id` when absent, otherwise behaves like `edit`.
    fn upsert(
        &self,
        id: &PollId,
        draft: PollDraft,
        creator: Creator,
    ) -> impl Future<Output = Result<Upsert, PollError>> + Send;

    fn remove(
        &self,
        id: &PollId,
        caller: UserId,
    ) -> impl Future<Output = Result<(), PollError>> + Send;
}
