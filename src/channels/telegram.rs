//! Telegram inbox: polls the Bot API and exposes chats as conversations.
//!
//! The Bot API has no "list my chats" call, so every `list_threads` drains
//! `getUpdates` into a bounded per-chat history and reports the chats that
//! received messages since their last successful fetch. Private chats are
//! direct conversations; group sizes come from `getChatMemberCount` and are
//! cached for a while. A chat Telegram refuses to describe (bot kicked, chat
//! deleted) is dropped until it shows up in updates again.

use std::collections::{BTreeMap, VecDeque};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::channels::inbox::InboxProvider;
use crate::error::ChannelError;
use crate::pipeline::types::{Conversation, Item, ThreadSummary};

const CHANNEL_NAME: &str = "telegram";

/// Default Bot API base URL.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Most recent items kept per chat.
pub const TELEGRAM_HISTORY_LIMIT: usize = 50;

/// HTTP timeout for Bot API calls. Long-poll waits stay below it.
const TELEGRAM_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest `getUpdates` wait accepted by [`TelegramInbox::with_poll_timeout`].
pub const TELEGRAM_MAX_POLL_TIMEOUT_SECS: u64 = 25;

/// How long a group's member count is reused before asking again.
const MEMBER_COUNT_TTL: Duration = Duration::from_secs(600);

// ── Bot API wire types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    title: Option<String>,
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
}

/// The bot's own identity, as reported by `getMe`.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: String,
    pub username: Option<String>,
}

// ── Buffered state ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    fn parse(kind: &str) -> Self {
        match kind {
            "private" => Self::Private,
            "group" | "supergroup" => Self::Group,
            _ => Self::Channel,
        }
    }
}

#[derive(Debug)]
struct ChatBuffer {
    kind: ChatKind,
    title: Option<String>,
    items: VecDeque<Item>,
    /// Bumped for every buffered message.
    revision: u64,
    /// Revision covered by the last successful fetch.
    fetched: u64,
    member_count: Option<(u32, Instant)>,
}

impl ChatBuffer {
    fn is_pending(&self) -> bool {
        self.revision != self.fetched
    }

    fn cached_member_count(&self) -> Option<u32> {
        self.member_count
            .filter(|(_, at)| at.elapsed() < MEMBER_COUNT_TTL)
            .map(|(count, _)| count)
    }
}

#[derive(Debug, Default)]
struct PollState {
    offset: i64,
    chats: BTreeMap<String, ChatBuffer>,
}

impl PollState {
    /// Buffer a batch of updates and advance the offset past them.
    fn ingest(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);

            let Some(message) = update.message else {
                continue;
            };

            let chat_id = message.chat.id.to_string();
            let buffer = self
                .chats
                .entry(chat_id.clone())
                .or_insert_with(|| ChatBuffer {
                    kind: ChatKind::parse(&message.chat.kind),
                    title: None,
                    items: VecDeque::new(),
                    revision: 0,
                    fetched: 0,
                    member_count: None,
                });
            buffer.title = message
                .chat
                .title
                .clone()
                .or_else(|| message.chat.first_name.clone());

            let (sender_id, display_name) = match &message.from {
                Some(user) => (
                    user.id.to_string(),
                    user.username.clone().or_else(|| user.first_name.clone()),
                ),
                None => (chat_id.clone(), None),
            };

            let text = message.text.or(message.caption).unwrap_or_default();
            let mut item = Item::new(format!("{chat_id}:{}", message.message_id), sender_id, text);
            if let Some(name) = display_name {
                item = item.with_display_name(name);
            }
            if let Some(sent_at) = DateTime::<Utc>::from_timestamp(message.date, 0) {
                item = item.with_sent_at(sent_at);
            }

            buffer.items.push_back(item);
            buffer.revision += 1;
            while buffer.items.len() > TELEGRAM_HISTORY_LIMIT {
                buffer.items.pop_front();
            }
        }
    }

    /// Chats holding messages no successful fetch has returned yet.
    fn summaries(&self) -> Vec<ThreadSummary> {
        self.chats
            .iter()
            .filter(|(_, chat)| chat.is_pending())
            .map(|(id, chat)| ThreadSummary {
                id: id.clone(),
                title: chat.title.clone(),
            })
            .collect()
    }

    /// Record a successful fetch of `chat_id` as of `revision`. Messages
    /// buffered after that snapshot keep the chat pending.
    fn mark_fetched(&mut self, chat_id: &str, revision: u64, fresh_count: Option<u32>) {
        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.fetched = chat.fetched.max(revision);
            if let Some(count) = fresh_count {
                chat.member_count = Some((count, Instant::now()));
            }
        }
    }
}

// ── Inbox ───────────────────────────────────────────────────────────

/// Telegram Bot API inbox.
pub struct TelegramInbox {
    bot_token: SecretString,
    base_url: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    state: Mutex<PollState>,
    me: OnceLock<BotIdentity>,
}

impl TelegramInbox {
    pub fn new(bot_token: SecretString) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(TELEGRAM_HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            bot_token,
            base_url: TELEGRAM_API_BASE.to_string(),
            poll_timeout_secs: 0,
            client,
            state: Mutex::new(PollState::default()),
            me: OnceLock::new(),
        })
    }

    /// Point the client at a different Bot API server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Long-poll wait passed to `getUpdates` (0 = return immediately),
    /// capped at [`TELEGRAM_MAX_POLL_TIMEOUT_SECS`].
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs.min(TELEGRAM_MAX_POLL_TIMEOUT_SECS);
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.bot_token.expose_secret()
        )
    }

    /// Identity recorded by [`verify`](Self::verify), if it has run.
    pub fn identity(&self) -> Option<&BotIdentity> {
        self.me.get()
    }

    /// Check the token with `getMe` and remember the bot's identity.
    pub async fn verify(&self) -> Result<BotIdentity, ChannelError> {
        let me: TgUser = self
            .call("getMe", &serde_json::json!({}))
            .await
            .map_err(|e| match e {
                ChannelError::AuthFailed { .. } => e,
                other => ChannelError::StartupFailed {
                    name: CHANNEL_NAME.into(),
                    reason: other.to_string(),
                },
            })?;

        let identity = BotIdentity {
            id: me.id.to_string(),
            username: me.username,
        };
        tracing::info!(
            bot_id = %identity.id,
            username = identity.username.as_deref().unwrap_or("unknown"),
            "Telegram bot verified"
        );
        let _ = self.me.set(identity.clone());
        Ok(identity)
    }

    /// POST a Bot API method and unwrap its `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {}", e.without_url())))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChannelError::AuthFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("{method} returned {status}"),
            });
        }

        let parsed: ApiResponse<T> = resp.json().await.map_err(|e| ChannelError::InvalidResponse {
            name: CHANNEL_NAME.into(),
            reason: format!("{method}: {}", e.without_url()),
        })?;

        if !parsed.ok {
            return Err(ChannelError::Rejected {
                name: CHANNEL_NAME.into(),
                method: method.to_string(),
                code: parsed
                    .error_code
                    .unwrap_or_else(|| i64::from(status.as_u16())),
                reason: parsed
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        parsed.result.ok_or_else(|| ChannelError::InvalidResponse {
            name: CHANNEL_NAME.into(),
            reason: format!("{method} returned no result ({status})"),
        })
    }

    /// Ask Telegram for a group's size. A permanent refusal drops the chat.
    async fn member_count(&self, chat_id: &str) -> Result<u32, ChannelError> {
        match self
            .call("getChatMemberCount", &serde_json::json!({ "chat_id": chat_id }))
            .await
        {
            Ok(count) => Ok(count),
            Err(e) => {
                if is_permanent_rejection(&e) {
                    self.state.lock().await.chats.remove(chat_id);
                    tracing::warn!(chat = chat_id, error = %e, "Chat no longer readable, dropping it");
                }
                Err(ChannelError::FetchFailed {
                    name: CHANNEL_NAME.into(),
                    target: chat_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl InboxProvider for TelegramInbox {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    fn self_id(&self) -> Option<String> {
        self.me.get().map(|me| me.id.clone())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, ChannelError> {
        let mut state = self.state.lock().await;
        let body = serde_json::json!({
            "offset": state.offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"]
        });
        let updates: Vec<Update> = self.call("getUpdates", &body).await?;
        if !updates.is_empty() {
            tracing::debug!(count = updates.len(), "Telegram updates received");
        }
        state.ingest(updates);
        Ok(state.summaries())
    }

    async fn fetch_thread(&self, thread: &ThreadSummary) -> Result<Conversation, ChannelError> {
        let (kind, title, items, revision, cached_count) = {
            let state = self.state.lock().await;
            let chat = state
                .chats
                .get(&thread.id)
                .ok_or_else(|| ChannelError::FetchFailed {
                    name: CHANNEL_NAME.into(),
                    target: thread.id.clone(),
                    reason: "unknown chat".into(),
                })?;
            (
                chat.kind,
                chat.title.clone(),
                chat.items.iter().cloned().collect::<Vec<_>>(),
                chat.revision,
                chat.cached_member_count(),
            )
        };

        let (participant_count, fresh_count) = match (kind, cached_count) {
            (ChatKind::Private, _) => (Some(2), None),
            (ChatKind::Group, Some(count)) => (Some(count), None),
            (ChatKind::Group, None) => {
                let count = self.member_count(&thread.id).await?;
                (Some(count), Some(count))
            }
            (ChatKind::Channel, _) => (None, None),
        };
        self.state
            .lock()
            .await
            .mark_fetched(&thread.id, revision, fresh_count);

        let mut conversation = Conversation::new(thread.id.clone(), participant_count, items);
        conversation.title = title;
        Ok(conversation)
    }

    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            let body = serde_json::json!({
                "chat_id": conversation_id,
                "text": chunk,
            });
            self.call::<serde_json::Value>("sendMessage", &body)
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: CHANNEL_NAME.into(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// A definite refusal from Telegram (kicked, chat gone), as opposed to a
/// rate limit, a server fault or a transport error.
fn is_permanent_rejection(error: &ChannelError) -> bool {
    matches!(error, ChannelError::Rejected { code, .. } if *code != 429 && *code < 500)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
