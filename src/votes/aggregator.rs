use crate::db::{Poll, PollStore, UserId, VoteEvent};
use crate::error::PollError;
use crate::sse::{POLL_TOPIC, SyncBroadcaster, SyncEvent};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_RETRY_LIMIT: u32 = 5;

/// Applies one vote at a time against the store and announces the result.
///
/// Announcements are serialized and carry a fresh read of the poll, so the
/// `Updated` snapshots a subscriber sees for a poll never go backwards even
/// when the votes behind them commit on different threads.
#[derive(Clone)]
pub struct VoteAggregator<S> {
    store: S,
    broadcaster: SyncBroadcaster,
    retry_limit: u32,
    announce_order: Arc<Mutex<()>>,
}

impl<S: PollStore> VoteAggregator<S> {
    pub fn new(store: S, broadcaster: SyncBroadcaster, retry_limit: u32) -> Self {
        VoteAggregator {
            store,
            broadcaster,
            retry_limit: retry_limit.max(1),
            announce_order: Arc::new(Mutex::new(())),
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Validates the option index against a fresh read, increments, and on
    /// success publishes exactly one `Updated` event. Write conflicts are
    /// retried up to the retry limit; nothing is published on failure.
    pub async fn cast(&self, vote: &VoteEvent, voter: Option<UserId>) -> Result<Poll, PollError> {
        let mut attempt = 1;
        loop {
            let current = self.store.find_by_id(&vote.poll_id).await?;
            if vote.option >= current.options.len() {
                return Err(PollError::InvalidVoteIndex);
            }

            match self
                .store
                .increment_vote(&vote.poll_id, vote.option, voter)
                .await
            {
                Ok(poll) => {
                    let delivered = self.announce(&poll).await;
                    debug!(
                        poll_id = %vote.poll_id,
                        option = vote.option,
                        attempt,
                        delivered,
                        "vote applied"
                    );
                    return Ok(poll);
                }
                Err(PollError::Conflict) if attempt < self.retry_limit => {
                    debug!(poll_id = %vote.poll_id, attempt, "vote conflicted, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(PollError::Conflict) => {
                    warn!(poll_id = %vote.poll_id, attempts = attempt, "vote gave up after repeated conflicts");
                    return Err(PollError::Conflict);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publishes the one `Updated` event for a committed vote.
    async fn announce(&self, applied: &Poll) -> usize {
        let _order = self.announce_order.lock().await;
        let latest = match self.store.find_by_id(&applied.id).await {
            Ok(latest) => latest,
            Err(PollError::NotFound) => {
                // its Removed event is already out
                debug!(poll_id = %applied.id, "poll removed before its vote was announced");
                return 0;
            }
            Err(e) => {
                warn!(poll_id = %applied.id, "re-read before announcing failed: {}", e);
                applied.clone()
            }
        };
        self.broadcaster
            .publish(POLL_TOPIC, SyncEvent::updated(latest))
    }
}

fn backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=2u64);
    Duration::from_millis(u64::from(attempt) + jitter)
}
