//! Configuration types, read from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::telegram::TELEGRAM_MAX_POLL_TIMEOUT_SECS;
use crate::error::ConfigError;
use crate::llm::generator::DEFAULT_SYSTEM_PROMPT;
use crate::llm::openrouter::{DEFAULT_OPENROUTER_URL, OpenRouterConfig};
use crate::pipeline::dispatch::DispatchConfig;

/// Default completion model.
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b:free";

/// Default seen-id file.
pub const DEFAULT_PROCESSED_FILE: &str = "processed_ids.json";

/// Default poll interval in seconds.
pub const DEFAULT_POLL_SECONDS: u64 = 20;

/// Default completion request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Responder configuration.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Telegram Bot API token.
    pub telegram_token: SecretString,
    /// Handle the bot answers to in group chats (without `@`).
    pub bot_username: String,
    /// `getUpdates` long-poll wait in seconds (0 = return immediately).
    pub telegram_poll_timeout: u64,
    pub openrouter_api_key: SecretString,
    pub model: String,
    pub openrouter_url: String,
    /// Send `reasoning: {enabled: true}` with each request.
    pub reasoning: bool,
    pub poll_interval: Duration,
    pub processed_file: PathBuf,
    pub request_timeout: Duration,
    /// Persona prompt sent as the system message of every request.
    pub system_prompt: String,
    /// Run a single cycle and exit.
    pub once: bool,
    /// Directory for daily-rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl ResponderConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let telegram_token = require("TELEGRAM_BOT_TOKEN")?;
        let bot_username = require("BOT_USERNAME")?
            .trim_start_matches('@')
            .to_string();
        if bot_username.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "BOT_USERNAME".into(),
                message: "handle must not be just '@'".into(),
            });
        }
        let openrouter_api_key = require("OPENROUTER_API_KEY")?;

        let telegram_poll_timeout = parse_u64(get("TELEGRAM_POLL_TIMEOUT"), "TELEGRAM_POLL_TIMEOUT", 0)?;
        if telegram_poll_timeout > TELEGRAM_MAX_POLL_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue {
                key: "TELEGRAM_POLL_TIMEOUT".into(),
                message: format!("must be at most {TELEGRAM_MAX_POLL_TIMEOUT_SECS}"),
            });
        }

        let poll_seconds = parse_u64(get("POLL_SECONDS"), "POLL_SECONDS", DEFAULT_POLL_SECONDS)?;
        if poll_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_SECONDS".into(),
                message: "must be at least 1".into(),
            });
        }
        let timeout_secs = parse_u64(
            get("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REQUEST_TIMEOUT_SECS".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            telegram_token: SecretString::from(telegram_token),
            bot_username,
            telegram_poll_timeout,
            openrouter_api_key: SecretString::from(openrouter_api_key),
            model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openrouter_url: get("OPENROUTER_URL").unwrap_or_else(|| DEFAULT_OPENROUTER_URL.to_string()),
            reasoning: parse_bool(get("OPENROUTER_REASONING"), "OPENROUTER_REASONING", true)?,
            poll_interval: Duration::from_secs(poll_seconds),
            processed_file: get("PROCESSED_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROCESSED_FILE)),
            request_timeout: Duration::from_secs(timeout_secs),
            system_prompt: get("RESPONDER_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            once: parse_bool(get("RESPONDER_ONCE"), "RESPONDER_ONCE", false)?,
            log_dir: get("RESPONDER_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Settings for the completion provider.
    pub fn openrouter(&self) -> OpenRouterConfig {
        OpenRouterConfig {
            api_key: self.openrouter_api_key.clone(),
            model: self.model.clone(),
            url: self.openrouter_url.clone(),
            timeout: self.request_timeout,
            reasoning: self.reasoning,
        }
    }

    /// Settings for the dispatch loop.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            poll_interval: self.poll_interval,
            ..DispatchConfig::default()
        }
    }
}

fn parse_u64(value: Option<String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{v:?} is not a whole number: {e}"),
        }),
    }
}

fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(v) = value else {
        return Ok(default);
    };
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{v:?} is not a boolean"),
        }),
    }
}
