use crate::error::PollError;
use chrono::{DateTime, Utc};
use json_patch::Patch;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;

/// Longest share line the client produces, in characters.
pub const SHARE_TEXT_LIMIT: usize = 140;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(String);

impl PollId {
    pub fn generate() -> Self {
        PollId(nanoid::nanoid!(10))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PollId {
    fn from(id: String) -> Self {
        PollId(id)
    }
}

impl From<&str> for PollId {
    fn from(id: &str) -> Self {
        PollId(id.to_string())
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `#RGB` or `#RRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = raw.strip_prefix('#')?;
        let valid = matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| Color(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Anything that is not a valid hex color is stored as unset.
fn lenient_color<'de, D>(deserializer: D) -> Result<Option<Color>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Color::parse))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: u64,
    #[serde(default, deserialize_with = "lenient_color")]
    pub color: Option<Color>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
}

/// Listing projection of a creator: only the display name is public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorView {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub date: DateTime<Utc>,
    pub creator: Creator,
    #[serde(default)]
    pub voters: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub date: DateTime<Utc>,
    pub creator: CreatorView,
}

/// Client-editable option. Vote counts sent by clients are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDraft {
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "lenient_color")]
    pub color: Option<Color>,
}

/// The part of a poll its creator controls. Ids, creators and dates in a
/// request body are never read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDraft {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<OptionDraft>,
}

impl Default for PollDraft {
    fn default() -> Self {
        PollDraft {
            question: String::new(),
            options: vec![OptionDraft::default(), OptionDraft::default()],
        }
    }
}

impl PollDraft {
    pub fn new(question: impl Into<String>, options: &[&str]) -> Self {
        PollDraft {
            question: question.into(),
            options: options
                .iter()
                .map(|text| OptionDraft {
                    text: text.to_string(),
                    color: None,
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), PollError> {
        if self.options.is_empty() {
            return Err(PollError::validation("a poll needs at least one option"));
        }
        Ok(())
    }

    /// Applies a JSON Patch (RFC 6902) to this draft's JSON form. Paths are
    /// relative to `{question, options: [{text, color}]}`; a failing op,
    /// including `test`, rejects the whole patch.
    pub fn patched(&self, patch: &Patch) -> Result<Self, PollError> {
        let mut doc = serde_json::to_value(self)?;
        json_patch::patch(&mut doc, &patch.0).map_err(|e| PollError::validation(e.to_string()))?;
        let draft: PollDraft = serde_json::from_value(doc)?;
        draft.validate()?;
        Ok(draft)
    }

    pub fn with_option_added(&self) -> Self {
        let mut next = self.clone();
        next.options.push(OptionDraft::default());
        next
    }

    /// Out-of-range indexes give back an unchanged copy.
    pub fn with_option_removed(&self, index: usize) -> Self {
        let mut next = self.clone();
        if index < next.options.len() {
            next.options.remove(index);
        }
        next
    }
}

/// One vote request: poll id plus option position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEvent {
    pub poll_id: PollId,
    pub option: usize,
}

impl VoteEvent {
    pub fn new(poll_id: impl Into<PollId>, option: usize) -> Self {
        VoteEvent {
            poll_id: poll_id.into(),
            option,
        }
    }
}

/// Newest first, ties broken by id so the order is total.
pub fn recency_cmp(
    a_date: DateTime<Utc>,
    a_id: &PollId,
    b_date: DateTime<Utc>,
    b_id: &PollId,
) -> Ordering {
    b_date.cmp(&a_date).then_with(|| a_id.cmp(b_id))
}

impl Poll {
    pub fn create(
        id: PollId,
        draft: PollDraft,
        creator: Creator,
        date: DateTime<Utc>,
    ) -> Result<Self, PollError> {
        draft.validate()?;
        Ok(Poll {
            id,
            question: draft.question,
            options: draft
                .options
                .into_iter()
                .map(|o| PollOption {
                    text: o.text,
                    votes: 0,
                    color: o.color,
                })
                .collect(),
            date,
            creator,
            voters: BTreeSet::new(),
        })
    }

    pub fn is_created_by(&self, user: UserId) -> bool {
        self.creator.id == user
    }

    /// New value with one more vote on `index`.
    pub fn with_vote(&self, index: usize, voter: Option<UserId>) -> Result<Self, PollError> {
        let mut next = self.clone();
        let option = next
            .options
            .get_mut(index)
            .ok_or(PollError::InvalidVoteIndex)?;
        option.votes += 1;
        if let Some(voter) = voter {
            next.voters.insert(voter);
        }
        Ok(next)
    }

    /// New value with the draft's question and options. Counts carry over by
    /// position from `self`; positions past the old end start at zero.
    pub fn edited(&self, draft: PollDraft) -> Result<Self, PollError> {
        draft.validate()?;
        let options = draft
            .options
            .into_iter()
            .enumerate()
            .map(|(i, o)| PollOption {
                text: o.text,
                votes: self.options.get(i).map_or(0, |existing| existing.votes),
                color: o.color,
            })
            .collect();

        Ok(Poll {
            question: draft.question,
            options,
            ..self.clone()
        })
    }

    pub fn draft(&self) -> PollDraft {
        PollDraft {
            question: self.question.clone(),
            options: self
                .options
                .iter()
                .map(|o| OptionDraft {
                    text: o.text.clone(),
                    color: o.color.clone(),
                })
                .collect(),
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    pub fn summary(&self) -> PollSummary {
        PollSummary::from(self.clone())
    }

    /// `question > url`, with the question cut short and suffixed with `...`
    /// when the line would exceed [`SHARE_TEXT_LIMIT`].
    pub fn share_text(&self, url: &str) -> String {
        let suffix = format!(" > {url}");
        let suffix_len = suffix.chars().count();
        let question_len = self.question.chars().count();

        if suffix_len + question_len <= SHARE_TEXT_LIMIT {
            return format!("{}{suffix}", self.question);
        }

        let keep = SHARE_TEXT_LIMIT.saturating_sub(suffix_len + 3);
        let head: String = self.question.chars().take(keep).collect();
        format!("{head}...{suffix}")
    }
}

impl From<Poll> for PollSummary {
    fn from(poll: Poll) -> Self {
        PollSummary {
            id: poll.id,
            question: poll.question,
            options: poll.options,
            date: poll.date,
            creator: CreatorView {
                name: poll.creator.name,
            },
        }
    }
}
