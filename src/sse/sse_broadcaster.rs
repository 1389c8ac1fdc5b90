use crate::sse::models::SyncEvent;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast::{self, error::RecvError};

pub type SubscriberId = u64;

pub const DEFAULT_CAPACITY: usize = 100;

struct Topic {
    sender: broadcast::Sender<SyncEvent>,
    subscribers: HashSet<SubscriberId>,
}

struct Hub {
    capacity: usize,
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

impl Hub {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, topic: &str, id: SubscriberId) -> bool {
        let mut topics = self.topics();
        let Some(entry) = topics.get_mut(topic) else {
            return false;
        };
        let removed = entry.subscribers.remove(&id);
        if entry.subscribers.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// Process-wide publish/subscribe hub for poll lifecycle events.
///
/// Each topic owns a bounded broadcast queue. Publishing never waits on a
/// subscriber; a subscriber that falls more than `capacity` events behind
/// loses the oldest ones and keeps going. Cloning shares the same hub.
#[derive(Clone)]
pub struct SyncBroadcaster {
    hub: Arc<Hub>,
}

impl Default for SyncBroadcaster {
    fn default() -> Self {
        SyncBroadcaster::new(DEFAULT_CAPACITY)
    }
}

impl SyncBroadcaster {
    pub fn new(capacity: usize) -> Self {
        SyncBroadcaster {
            hub: Arc::new(Hub {
                capacity: capacity.max(1),
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.hub.topics();
        let entry = topics.entry(topic.to_string()).or_insert_with(|| Topic {
            sender: broadcast::channel(self.hub.capacity).0,
            subscribers: HashSet::new(),
        });
        entry.subscribers.insert(id);
        let receiver = entry.sender.subscribe();
        drop(topics);

        debug!(topic, subscriber = id, "subscribed");
        Subscription {
            id,
            topic: topic.to_string(),
            receiver: Some(receiver),
            hub: Arc::downgrade(&self.hub),
            missed: 0,
        }
    }

    /// Fire-and-forget. Returns how many live subscribers the event was
    /// queued for.
    pub fn publish(&self, topic: &str, event: SyncEvent) -> usize {
        let topics = self.hub.topics();
        let Some(entry) = topics.get(topic) else {
            debug!(topic, event = event.name(), "no subscribers");
            return 0;
        };
        entry.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.hub
            .topics()
            .get(topic)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Drops every topic. Live subscriptions observe end-of-stream.
    pub fn shutdown(&self) {
        let mut topics = self.hub.topics();
        let dropped: usize = topics.values().map(|t| t.subscribers.len()).sum();
        topics.clear();
        info!(subscribers = dropped, "sync broadcaster shut down");
    }
}

/// A live channel on one topic. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    receiver: Option<broadcast::Receiver<SyncEvent>>,
    hub: Weak<Hub>,
    missed: u64,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Events skipped because this subscriber lagged behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Next event in publish order, or `None` once unsubscribed or the hub
    /// has shut down.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    warn!(
                        topic = %self.topic,
                        subscriber = self.id,
                        skipped,
                        "subscriber lagged, oldest events dropped"
                    );
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_none() {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.release(&self.topic, self.id);
        }
        debug!(topic = %self.topic, subscriber = self.id, "unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
