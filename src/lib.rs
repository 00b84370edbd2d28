//! Inbox responder: replies to direct messages and group mentions.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod shutdown;
pub mod store;
