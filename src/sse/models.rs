use crate::db::models::{Poll, PollId};
use serde::{Deserialize, Serialize};

/// Topic every poll lifecycle event is published on.
pub const POLL_TOPIC: &str = "poll";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedPoll {
    pub id: PollId,
}

/// Wire form: `{"type": "created" | "updated" | "removed", "poll": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Created { poll: Poll },
    Updated { poll: Poll },
    Removed { poll: RemovedPoll },
}

impl SyncEvent {
    pub fn created(poll: Poll) -> Self {
        SyncEvent::Created { poll }
    }

    pub fn updated(poll: Poll) -> Self {
        SyncEvent::Updated { poll }
    }

    pub fn removed(id: PollId) -> Self {
        SyncEvent::Removed {
            poll: RemovedPoll { id },
        }
    }

    pub fn poll_id(&self) -> &PollId {
        match self {
            SyncEvent::Created { poll } | SyncEvent::Updated { poll } => &poll.id,
            SyncEvent::Removed { poll } => &poll.id,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Created { .. } => "created",
            SyncEvent::Updated { .. } => "updated",
            SyncEvent::Removed { .. } => "removed",
        }
    }
}
