//! Inbox providers and the per-cycle scanner.

pub mod inbox;
pub mod telegram;

pub use inbox::{InboxProvider, InboxScanner};
pub use telegram::TelegramInbox;
