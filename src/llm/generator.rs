//! Reply generator: turns one inbound item's text into a `ReplyOutcome`.
//!
//! Every call is a single-turn exchange: the fixed persona prompt plus the
//! item text. No earlier turns of the conversation are sent.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::ReplyOutcome;

/// Default persona prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Mukuu 🐼, a friendly, respectful AI assistant created by Pulkit. \
     You detect the user's language and reply in that language. Keep responses short, helpful, and polite. \
     You use soft emojis matching the tone (like ❤️, 🥺) but avoid overuse. \
     If someone explicitly says they are 'Pulkit's Madam Ji', 'Mahek', 'Mahek Pandey', or 'Mukuu', \
     then respond with warm respect and emotion, saying Pulkit created you for her and that you feel honored. \
     Always end replies with the signature emoji 🐼.";

/// Default outer bound on a single generation call.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps an [`LlmProvider`] behind a call that never fails loudly.
pub struct ReplyGenerator {
    llm: Arc<dyn LlmProvider>,
    system_prompt: String,
    timeout: Duration,
}

impl ReplyGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generate a reply to `user_text`.
    pub async fn generate(&self, user_text: &str) -> ReplyOutcome {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(user_text),
        ]);

        let response = match tokio::time::timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return ReplyOutcome::ProviderError(e.to_string()),
            Err(_) => {
                return ReplyOutcome::ProviderError(format!(
                    "{} timed out after {:?}",
                    self.llm.model_name(),
                    self.timeout
                ));
            }
        };

        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Completion received"
        );

        let text = response.content.trim();
        if text.is_empty() {
            return ReplyOutcome::ProviderError("empty completion".to_string());
        }
        ReplyOutcome::Success(text.to_string())
    }
}
