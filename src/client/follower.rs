use crate::db::{Poll, PollId, PollSummary, recency_cmp};
use crate::sse::{Subscription, SyncEvent};
use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};

/// Anything a follower can keep locally: keyed by poll id, ordered by
/// creation date, and buildable from a full poll snapshot.
pub trait SyncItem: From<Poll> {
    fn poll_id(&self) -> &PollId;
    fn created_at(&self) -> DateTime<Utc>;
}

impl SyncItem for Poll {
    fn poll_id(&self) -> &PollId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.date
    }
}

impl SyncItem for PollSummary {
    fn poll_id(&self) -> &PollId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.date
    }
}

/// Client-held copy of a poll collection kept current by sync events.
///
/// Merging is keyed by id and replaces whole snapshots, so applying an
/// event twice, or receiving events for unrelated polls out of order,
/// converges on the same state.
#[derive(Debug, Clone)]
pub struct ClientSyncFollower<T = Poll> {
    items: Vec<T>,
    limit: Option<usize>,
}

impl<T: SyncItem> ClientSyncFollower<T> {
    pub fn new(seed: Vec<T>) -> Self {
        let mut follower = ClientSyncFollower {
            items: seed,
            limit: None,
        };
        follower.resort();
        follower
    }

    /// Keeps at most `limit` items, like a single page of the listing.
    /// Events about polls that sort past the window are absorbed.
    pub fn with_limit(seed: Vec<T>, limit: usize) -> Self {
        let mut follower = Self::new(seed);
        follower.limit = Some(limit);
        follower.truncate();
        follower
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, id: &PollId) -> Option<&T> {
        self.items.iter().find(|item| item.poll_id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Created { poll } | SyncEvent::Updated { poll } => self.upsert(T::from(poll)),
            SyncEvent::Removed { poll } => self.items.retain(|item| item.poll_id() != &poll.id),
        }
    }

    /// Drains a subscription until it ends. Returns how many events were
    /// merged.
    pub async fn follow(&mut self, subscription: &mut Subscription) -> usize {
        let mut applied = 0;
        while let Some(event) = subscription.recv().await {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    pub async fn follow_stream<St>(&mut self, mut events: St) -> usize
    where
        St: Stream<Item = SyncEvent> + Unpin,
    {
        let mut applied = 0;
        while let Some(event) = events.next().await {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn upsert(&mut self, item: T) {
        match self
            .items
            .iter_mut()
            .find(|existing| existing.poll_id() == item.poll_id())
        {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        self.resort();
        self.truncate();
    }

    fn resort(&mut self) {
        self.items.sort_by(|a, b| {
            recency_cmp(a.created_at(), a.poll_id(), b.created_at(), b.poll_id())
        });
    }

    fn truncate(&mut self) {
        if let Some(limit) = self.limit {
            self.items.truncate(limit);
        }
    }
}
