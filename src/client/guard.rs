use crate::db::PollId;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const VOTED_MARKER: &str = "true";

#[derive(Error, Debug)]
pub enum GuardError<E> {
    #[error("already voted on poll {0}")]
    AlreadyVoted(PollId),
    #[error("vote request failed: {0}")]
    Request(#[source] E),
    #[error("vote was accepted but could not be recorded locally: {0}")]
    Persist(#[from] io::Error),
}

/// Client-local record of the polls this client has voted on.
///
/// Advisory only: it stops accidental double submissions from the same
/// client, nothing more. When backed by a file the record is stored as a
/// JSON object mapping poll id to `"true"`.
#[derive(Debug, Default)]
pub struct DuplicateVoteGuard {
    voted: BTreeSet<PollId>,
    path: Option<PathBuf>,
}

impl DuplicateVoteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the record at `path`; a missing file is an empty record.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let voted = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let entries: BTreeMap<String, String> =
                    serde_json::from_str(&raw).map_err(to_io_error)?;
                entries
                    .into_iter()
                    .filter(|(_, marker)| marker == VOTED_MARKER)
                    .map(|(id, _)| PollId::from(id))
                    .collect()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e),
        };

        Ok(DuplicateVoteGuard {
            voted,
            path: Some(path),
        })
    }

    pub fn has_voted(&self, poll_id: &PollId) -> bool {
        self.voted.contains(poll_id)
    }

    pub fn record(&mut self, poll_id: &PollId) -> io::Result<()> {
        if self.voted.insert(poll_id.clone()) {
            self.persist()?;
        }
        Ok(())
    }

    /// Forgets every recorded vote, as clearing local storage would.
    pub fn clear(&mut self) -> io::Result<()> {
        self.voted.clear();
        self.persist()
    }

    /// Runs `submit` unless this client already voted on `poll_id`, and
    /// records the vote only once `submit` succeeds. Request failures are
    /// handed back unchanged.
    pub async fn vote_with<F, Fut, T, E>(
        &mut self,
        poll_id: &PollId,
        submit: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        if self.has_voted(poll_id) {
            debug!(poll_id = %poll_id, "vote blocked locally");
            return Err(GuardError::AlreadyVoted(poll_id.clone()));
        }

        let response = submit().await.map_err(GuardError::Request)?;
        self.record(poll_id)?;
        Ok(response)
    }

    fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries: BTreeMap<&str, &str> = self
            .voted
            .iter()
            .map(|id| (id.as_str(), VOTED_MARKER))
            .collect();
        let encoded = serde_json::to_vec_pretty(&entries).map_err(to_io_error)?;
        std::fs::write(path, encoded)
    }
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
