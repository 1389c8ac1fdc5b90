use crate::config::Config;
use crate::db::connection::{DbPool, pool_stats};
use crate::db::PollStore;
use crate::sse::SyncBroadcaster;
use crate::votes::{VoteAggregator, VoteLedger};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Everything a request handler needs. The broadcaster and ledger are
/// owned here, injected into handlers, and torn down with the process.
#[derive(Clone)]
pub struct AppState<S> {
    pub store: S,
    pub broadcaster: SyncBroadcaster,
    pub aggregator: VoteAggregator<S>,
    pub ledger: Option<VoteLedger>,
}

impl<S: PollStore> AppState<S> {
    pub fn new(store: S, config: &Config) -> Self {
        let broadcaster = SyncBroadcaster::new(config.broadcast_capacity);
        let aggregator =
            VoteAggregator::new(store.clone(), broadcaster.clone(), config.vote_retry_limit);
        let ledger = (!config.vote_token_ttl.is_zero()).then(|| VoteLedger::new(config.vote_token_ttl));

        AppState {
            store,
            broadcaster,
            aggregator,
            ledger,
        }
    }

    /// Periodically drops expired vote claims.
    pub fn spawn_ledger_purge(&self, every: Duration) -> Option<JoinHandle<()>> {
        let ledger = self.ledger.clone()?;
        Some(tokio::spawn(async move {
            let mut interval = interval(every);
            loop {
                interval.tick().await;
                let purged = ledger.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = ledger.len(), "expired vote claims purged");
                }
            }
        }))
    }

    pub fn shutdown(&self) {
        self.broadcaster.shutdown();
    }
}

pub fn spawn_db_health_check(db: DbPool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match db.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", pool_stats(&db));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    })
}
