//! LLM integration for reply generation.
//!
//! - `provider`: the `LlmProvider` trait and chat types
//! - `openrouter`: OpenAI-compatible HTTP backend (OpenRouter by default)
//! - `generator`: single-turn reply generation returning `ReplyOutcome`

pub mod generator;
pub mod openrouter;
pub mod provider;

pub use generator::{DEFAULT_SYSTEM_PROMPT, ReplyGenerator};
pub use openrouter::{OpenRouterConfig, OpenRouterProvider};
pub use provider::*;

use std::sync::Arc;

use crate::error::LlmError;

/// Create the completion provider from configuration.
pub fn create_provider(config: &OpenRouterConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenRouterProvider::new(config.clone())?;
    tracing::info!("Using OpenRouter (model: {})", config.model);
    Ok(Arc::new(provider))
}
