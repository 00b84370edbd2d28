use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use inbox_responder::channels::{InboxProvider, TelegramInbox};
use inbox_responder::config::ResponderConfig;
use inbox_responder::llm::{ReplyGenerator, create_provider};
use inbox_responder::pipeline::{Eligibility, Responder, spawn_responder};
use inbox_responder::shutdown::ShutdownSignal;
use inbox_responder::store::SeenStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ResponderConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Required: TELEGRAM_BOT_TOKEN, BOT_USERNAME, OPENROUTER_API_KEY");
        std::process::exit(1);
    });

    let _log_guard = inbox_responder::logging::init(config.log_dir.as_deref());

    eprintln!("🐼 Inbox Responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Handle: @{}", config.bot_username);
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());
    eprintln!("   Seen ids: {}", config.processed_file.display());

    // ── Completion provider ─────────────────────────────────────────────
    let llm = create_provider(&config.openrouter()).context("creating completion provider")?;
    let generator = ReplyGenerator::new(llm, config.system_prompt.clone())
        .with_timeout(config.request_timeout);

    // ── Inbox ───────────────────────────────────────────────────────────
    let telegram = TelegramInbox::new(config.telegram_token.clone())
        .context("creating Telegram client")?
        .with_poll_timeout(config.telegram_poll_timeout);
    let identity = telegram.verify().await.unwrap_or_else(|e| {
        eprintln!("Error: Telegram login failed: {e}");
        std::process::exit(1);
    });
    eprintln!(
        "   Logged in as @{}",
        identity.username.as_deref().unwrap_or(&identity.id)
    );
    let inbox: Arc<dyn InboxProvider> = Arc::new(telegram);

    let mut eligibility = Eligibility::new(&config.bot_username);
    if let Some(self_id) = inbox.self_id() {
        eligibility = eligibility.with_self_id(self_id);
    }

    // ── Dedup store ─────────────────────────────────────────────────────
    let store = SeenStore::new(config.processed_file.clone());
    let seen = store.load().await;
    eprintln!("   Known items: {}\n", seen.len());

    let mut responder = Responder::new(
        inbox,
        generator,
        eligibility,
        store,
        seen,
        config.dispatch(),
    );

    if config.once {
        responder.run_cycles(1).await;
        return Ok(());
    }

    let shutdown = ShutdownSignal::install().context("installing shutdown handlers")?;
    let cancel = CancellationToken::new();
    let handle = spawn_responder(responder, cancel.clone());

    let signal = shutdown.recv().await.context("waiting for shutdown signal");
    tracing::info!("Shutdown requested, finishing current cycle");
    cancel.cancel();
    handle.await.context("responder task panicked")?;

    signal
}
