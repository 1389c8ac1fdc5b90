use crate::db::models::{Creator, Poll, PollDraft, PollId, PollSummary, UserId, recency_cmp};
use crate::db::pagination::PageWindow;
use crate::db::store::{PollStore, Upsert};
use crate::error::PollError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    poll: Poll,
}

/// In-process store. Every document carries a version; vote increments read
/// a snapshot, build the next value outside the lock and only commit if the
/// version is still the one they read.
#[derive(Debug, Clone, Default)]
pub struct MemoryPollStore {
    polls: Arc<RwLock<HashMap<PollId, Versioned>>>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.polls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.polls.read().await.is_empty()
    }

    /// Current version of a poll, bumped on every committed write.
    pub async fn version(&self, id: &PollId) -> Option<u64> {
        self.polls.read().await.get(id).map(|entry| entry.version)
    }

    async fn sorted(&self, filter: impl Fn(&Poll) -> bool) -> Vec<Poll> {
        let polls = self.polls.read().await;
        let mut matching: Vec<Poll> = polls
            .values()
            .map(|entry| &entry.poll)
            .filter(|poll| filter(poll))
            .cloned()
            .collect();
        matching.sort_by(|a, b| recency_cmp(a.date, &a.id, b.date, &b.id));
        matching
    }

    /// Single compare-and-swap attempt.
    async fn compare_and_swap(
        &self,
        id: &PollId,
        expected: u64,
        next: Poll,
    ) -> Result<Poll, PollError> {
        let mut polls = self.polls.write().await;
        let entry = polls.get_mut(id).ok_or(PollError::NotFound)?;
        if entry.version != expected {
            debug!(poll_id = %id, expected, found = entry.version, "version moved, vote not applied");
            return Err(PollError::Conflict);
        }
        entry.version += 1;
        entry.poll = next.clone();
        Ok(next)
    }
}

impl PollStore for MemoryPollStore {
    async fn find_by_id(&self, id: &PollId) -> Result<Poll, PollError> {
        self.polls
            .read()
            .await
            .get(id)
            .map(|entry| entry.poll.clone())
            .ok_or(PollError::NotFound)
    }

    async fn list_recent(&self, window: PageWindow) -> Result<Vec<PollSummary>, PollError> {
        let sorted = self.sorted(|_| true).await;
        Ok(window
            .apply(&sorted)
            .iter()
            .cloned()
            .map(PollSummary::from)
            .collect())
    }

    async fn list_by_creator(&self, creator: UserId) -> Result<Vec<Poll>, PollError> {
        Ok(self.sorted(|poll| poll.is_created_by(creator)).await)
    }

    async fn insert(&self, draft: PollDraft, creator: Creator) -> Result<Poll, PollError> {
        let mut polls = self.polls.write().await;
        let mut id = PollId::generate();
        while polls.contains_key(&id) {
            id = PollId::generate();
        }
        let poll = Poll::create(id.clone(), draft, creator, Utc::now())?;
        polls.insert(
            id,
            Versioned {
                version: 0,
                poll: poll.clone(),
            },
        );
        Ok(poll)
    }

    async fn increment_vote(
        &self,
        id: &PollId,
        index: usize,
        voter: Option<UserId>,
    ) -> Result<Poll, PollError> {
        let (expected, current) = {
            let polls = self.polls.read().await;
            let entry = polls.get(id).ok_or(PollError::NotFound)?;
            (entry.version, entry.poll.clone())
        };
        let next = current.with_vote(index, voter)?;
        self.compare_and_swap(id, expected, next).await
    }

    async fn edit(&self, id: &PollId, draft: PollDraft, caller: UserId) -> Result<Poll, PollError> {
        let mut polls = self.polls.write().await;
        let entry = polls.get_mut(id).ok_or(PollError::NotFound)?;
        if !entry.poll.is_created_by(caller) {
            return Err(PollError::Unauthorized);
        }
        let next = entry.poll.edited(draft)?;
        entry.version += 1;
        entry.poll = next.clone();
        Ok(next)
    }

    async fn patch<F>(&self, id: &PollId, caller: UserId, apply: F) -> Result<Poll, PollError>
    where
        F: FnOnce(PollDraft) -> Result<PollDraft, PollError> + Send,
    {
        let mut polls = self.polls.write().await;
        let entry = polls.get_mut(id).ok_or(PollError::NotFound)?;
        if !entry.poll.is_created_by(caller) {
            return Err(PollError::Unauthorized);
        }
        let next = entry.poll.edited(apply(entry.poll.draft())?)?;
        entry.version += 1;
        entry.poll = next.clone();
        Ok(next)
    }

    async fn upsert(
        &self,
        id: &PollId,
        draft: PollDraft,
        creator: Creator,
    ) -> Result<Upsert, PollError> {
        let mut polls = self.polls.write().await;
        match polls.get_mut(id) {
            Some(entry) => {
                if !entry.poll.is_created_by(creator.id) {
                    return Err(PollError::Unauthorized);
                }
                let next = entry.poll.edited(draft)?;
                entry.version += 1;
                entry.poll = next.clone();
                Ok(Upsert::Updated(next))
            }
            None => {
                let poll = Poll::create(id.clone(), draft, creator, Utc::now())?;
                polls.insert(
                    id.clone(),
                    Versioned {
                        version: 0,
                        poll: poll.clone(),
                    },
                );
                Ok(Upsert::Created(poll))
            }
        }
    }

    async fn remove(&self, id: &PollId, caller: UserId) -> Result<(), PollError> {
        let mut polls = self.polls.write().await;
        let entry = polls.get(id).ok_or(PollError::NotFound)?;
        if !entry.poll.is_created_by(caller) {
            return Err(PollError::Unauthorized);
        }
        polls.remove(id);
        Ok(())
    }
}
