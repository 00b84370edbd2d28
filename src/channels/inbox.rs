//! Inbox provider abstraction and the per-cycle scanner.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::pipeline::types::{Conversation, ThreadSummary};

/// A message source that exposes conversations and can post replies.
///
/// Implementations are expected to be authenticated before the dispatch
/// loop starts.
#[async_trait]
pub trait InboxProvider: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// The bot's own account id, used to skip self-sent items.
    fn self_id(&self) -> Option<String> {
        None
    }

    /// List the conversations that may hold items not handled yet.
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, ChannelError>;

    /// Fetch one conversation with its full item list.
    async fn fetch_thread(&self, thread: &ThreadSummary) -> Result<Conversation, ChannelError>;

    /// Post `text` into a conversation.
    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Pulls the current conversations from an [`InboxProvider`].
pub struct InboxScanner {
    provider: Arc<dyn InboxProvider>,
}

impl InboxScanner {
    pub fn new(provider: Arc<dyn InboxProvider>) -> Self {
        Self { provider }
    }

    /// List every conversation with its items, oldest first.
    ///
    /// A failed listing is returned as a single error. A failed detail fetch
    /// only drops that conversation from this cycle.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ChannelError> {
        let threads = self.provider.list_threads().await?;
        debug!(
            channel = self.provider.name(),
            count = threads.len(),
            "Listed inbox threads"
        );

        let mut conversations = Vec::with_capacity(threads.len());
        for thread in &threads {
            match self.provider.fetch_thread(thread).await {
                Ok(mut conversation) => {
                    sort_oldest_first(&mut conversation);
                    conversations.push(conversation);
                }
                Err(e) => {
                    warn!(
                        channel = self.provider.name(),
                        thread = %thread.id,
                        error = %e,
                        "Failed to fetch thread, retrying next cycle"
                    );
                }
            }
        }
        Ok(conversations)
    }
}

/// Stable-sort items by timestamp when every item has one.
fn sort_oldest_first(conversation: &mut Conversation) {
    if conversation.items.iter().all(|i| i.sent_at.is_some()) {
        conversation.items.sort_by_key(|i| i.sent_at);
    }
}
