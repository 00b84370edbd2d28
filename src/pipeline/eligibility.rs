//! Reply eligibility: decides per item whether a reply is produced.
//!
//! - Direct conversations: every item gets a reply, empty ones included.
//! - Group conversations: only items that mention the bot handle.
//! - Unknown topology: handled like a direct conversation.
//! - Items the bot sent itself never get a reply.
//!
//! The mention check is a loose, case-insensitive substring test. It
//! matches `@handle`, a bare `handle`, and `handle` inside a longer word.

use tracing::debug;

use crate::pipeline::types::{Conversation, Item, Topology};

/// Pure reply-eligibility classifier.
#[derive(Debug, Clone)]
pub struct Eligibility {
    /// Lowercased handle without a leading `@`.
    handle: String,
    /// The bot's own account id on the inbox provider, if known.
    self_id: Option<String>,
}

impl Eligibility {
    /// Create a classifier for the given bot handle (`"mukuu"` or `"@mukuu"`).
    pub fn new(handle: &str) -> Self {
        Self {
            handle: handle.trim().trim_start_matches('@').to_lowercase(),
            self_id: None,
        }
    }

    /// Never reply to items sent by this account id.
    pub fn with_self_id(mut self, self_id: impl Into<String>) -> Self {
        self.self_id = Some(self_id.into());
        self
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Does `text` mention the handle?
    pub fn mentions_handle(&self, text: &str) -> bool {
        if self.handle.is_empty() {
            return false;
        }
        text.to_lowercase().contains(&self.handle)
    }

    /// Should `item` in `conversation` get a generated reply?
    pub fn should_reply(&self, conversation: &Conversation, item: &Item) -> bool {
        if self.self_id.as_deref() == Some(item.sender_id.as_str()) {
            debug!(item = %item.id, "Skipping self-sent item");
            return false;
        }

        match conversation.topology() {
            Topology::Group => self.mentions_handle(&item.text),
            Topology::Direct => true,
            Topology::Unknown => {
                debug!(
                    conversation = %conversation.id,
                    "Participant count unknown, treating as direct"
                );
                true
            }
        }
    }
}
