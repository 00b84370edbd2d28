//! Message processing pipeline.
//!
//! Every cycle flows through:
//! 1. `InboxScanner::list_conversations()`: provider I/O
//! 2. `Eligibility::should_reply()`: pure per-item decision
//! 3. `ReplyGenerator::generate()`: single-turn completion
//! 4. `InboxProvider::send_reply()`: dispatch, then mark seen

pub mod dispatch;
pub mod eligibility;
pub mod types;

pub use dispatch::{CycleReport, DispatchConfig, Responder, spawn_responder};
pub use eligibility::Eligibility;
pub use types::{Conversation, Item, ItemId, ReplyOutcome, SeenSet, ThreadSummary, Topology};
