use crate::db::PollId;
use crate::error::PollError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-session voter token kept in the session store.
pub type VoterToken = Uuid;

/// Proof that a voter holds the right to one vote on one poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteClaim {
    pub voter: VoterToken,
    pub poll: PollId,
}

/// Server-side duplicate vote guard: one vote per voter token and poll
/// within the time-to-live.
#[derive(Clone)]
pub struct VoteLedger {
    ttl: Duration,
    claims: Arc<Mutex<HashMap<VoteClaim, Instant>>>,
}

impl VoteLedger {
    pub fn new(ttl: Duration) -> Self {
        VoteLedger {
            ttl,
            claims: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<VoteClaim, Instant>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(&self, voter: VoterToken, poll: &PollId) -> Result<VoteClaim, PollError> {
        let claim = VoteClaim {
            voter,
            poll: poll.clone(),
        };
        let now = Instant::now();
        let mut claims = self.claims();

        if let Some(expires) = claims.get(&claim) {
            if *expires > now {
                return Err(PollError::AlreadyVoted);
            }
        }
        claims.insert(claim.clone(), now + self.ttl);
        Ok(claim)
    }

    /// Gives a claim back after the vote it guarded failed.
    pub fn release(&self, claim: &VoteClaim) {
        self.claims().remove(claim);
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut claims = self.claims();
        let before = claims.len();
        claims.retain(|_, expires| *expires > now);
        before - claims.len()
    }

    pub fn len(&self) -> usize {
        self.claims().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims().is_empty()
    }
}
