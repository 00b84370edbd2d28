//! Shared types for the ingestion → decision → dispatch pipeline.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ─────────────────────────────────────────────────────

/// Provider-native identifier of a single item. Numeric ids are stringified.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ── Conversations ───────────────────────────────────────────────────

/// A single message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Message body. May be empty (media-only items, reactions).
    pub text: String,
    pub sender_id: String,
    pub sender_display_name: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sender_id: sender_id.into(),
            sender_display_name: None,
            sent_at: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.sender_display_name = Some(name.into());
        self
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    /// Display name if known, sender id otherwise.
    pub fn sender_label(&self) -> &str {
        self.sender_display_name.as_deref().unwrap_or(&self.sender_id)
    }
}

/// How many people take part in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Two or fewer participants.
    Direct,
    /// More than two participants.
    Group,
    /// Participant data was not reported.
    Unknown,
}

/// A thread of items, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub participant_count: Option<u32>,
    pub items: Vec<Item>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, participant_count: Option<u32>, items: Vec<Item>) -> Self {
        Self {
            id: id.into(),
            title: None,
            participant_count,
            items,
        }
    }

    pub fn topology(&self) -> Topology {
        match self.participant_count {
            Some(n) if n > 2 => Topology::Group,
            Some(_) => Topology::Direct,
            None => Topology::Unknown,
        }
    }
}

/// Listing entry returned before a conversation's detail is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: String,
    pub title: Option<String>,
}

impl ThreadSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
        }
    }
}

// ── Seen set ────────────────────────────────────────────────────────

/// Item ids that have already been handled. Grows monotonically, so there
/// is no removal API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenSet(BTreeSet<ItemId>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.0.contains(id)
    }

    /// Returns `true` if the id was not already present.
    pub fn insert(&mut self, id: ItemId) -> bool {
        self.0.insert(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ItemId> for SeenSet {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── Reply outcome ───────────────────────────────────────────────────

/// Result of one reply-generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Non-empty, trimmed reply text.
    Success(String),
    /// The completion provider failed; carries a diagnostic for the log.
    ProviderError(String),
}
