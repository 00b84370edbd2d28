//! Dispatch loop: scan → filter unseen → classify → generate → send → mark seen.
//!
//! One sequential worker owns the `SeenSet`. Each item is marked seen once
//! it has been handled, whether or not a reply went out, and the set is
//! flushed after every conversation that changed it. No in-loop failure
//! ends the loop; only cancellation does.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::inbox::{InboxProvider, InboxScanner};
use crate::llm::generator::ReplyGenerator;
use crate::pipeline::eligibility::Eligibility;
use crate::pipeline::types::{Conversation, Item, ReplyOutcome, SeenSet};
use crate::store::SeenStore;

/// Default poll interval: 20 seconds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Timing knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Sleep between scan cycles.
    pub poll_interval: Duration,
    /// Lower bound of the random pause before each send.
    pub send_delay_min: Duration,
    /// Upper bound of the random pause before each send.
    pub send_delay_max: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            send_delay_min: Duration::from_millis(1000),
            send_delay_max: Duration::from_millis(2500),
        }
    }
}

/// Counters for one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scan_failed: bool,
    pub conversations: usize,
    pub already_seen: usize,
    pub ignored: usize,
    pub replied: usize,
    pub generation_failures: usize,
    pub send_failures: usize,
    pub persist_failures: usize,
}

impl CycleReport {
    /// Items newly marked seen this cycle.
    pub fn handled(&self) -> usize {
        self.ignored + self.replied + self.generation_failures + self.send_failures
    }

    fn log(&self) {
        if self.scan_failed {
            return;
        }
        if self.handled() == 0 && self.persist_failures == 0 {
            debug!(conversations = self.conversations, "Cycle complete, nothing new");
        } else {
            info!(
                conversations = self.conversations,
                replied = self.replied,
                ignored = self.ignored,
                generation_failures = self.generation_failures,
                send_failures = self.send_failures,
                persist_failures = self.persist_failures,
                "Cycle complete"
            );
        }
    }
}

/// The responder: owns the seen set and drives the scan cycles.
pub struct Responder {
    inbox: Arc<dyn InboxProvider>,
    scanner: InboxScanner,
    generator: ReplyGenerator,
    eligibility: Eligibility,
    store: SeenStore,
    seen: SeenSet,
    config: DispatchConfig,
}

impl Responder {
    /// `seen` is normally the result of `store.load()`.
    pub fn new(
        inbox: Arc<dyn InboxProvider>,
        generator: ReplyGenerator,
        eligibility: Eligibility,
        store: SeenStore,
        seen: SeenSet,
        config: DispatchConfig,
    ) -> Self {
        Self {
            scanner: InboxScanner::new(Arc::clone(&inbox)),
            inbox,
            generator,
            eligibility,
            store,
            seen,
            config,
        }
    }

    /// Read-only view of the in-memory seen set.
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Run one scan cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let conversations = match self.scanner.list_conversations().await {
            Ok(conversations) => conversations,
            Err(e) => {
                error!(channel = self.inbox.name(), error = %e, "Inbox scan failed");
                report.scan_failed = true;
                return report;
            }
        };

        for conversation in &conversations {
            report.conversations += 1;
            let mut dirty = false;

            for item in &conversation.items {
                if self.seen.contains(&item.id) {
                    report.already_seen += 1;
                    continue;
                }
                self.handle_item(conversation, item, &mut report).await;
                self.seen.insert(item.id.clone());
                dirty = true;
            }

            if dirty && let Err(e) = self.store.save(&self.seen).await {
                report.persist_failures += 1;
                error!(
                    conversation = %conversation.id,
                    path = %self.store.path().display(),
                    error = %e,
                    "Failed to persist seen ids"
                );
            }
        }

        report
    }

    /// Decide, generate and send for one unseen item. Never fails.
    async fn handle_item(&self, conversation: &Conversation, item: &Item, report: &mut CycleReport) {
        if !self.eligibility.should_reply(conversation, item) {
            debug!(conversation = %conversation.id, item = %item.id, "Not eligible for reply");
            report.ignored += 1;
            return;
        }

        let text = match self.generator.generate(&item.text).await {
            ReplyOutcome::Success(text) => text,
            ReplyOutcome::ProviderError(detail) => {
                warn!(
                    conversation = %conversation.id,
                    item = %item.id,
                    detail = %detail,
                    "Reply generation failed, skipping item"
                );
                report.generation_failures += 1;
                return;
            }
        };

        let delay = send_delay(&self.config);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.inbox.send_reply(&conversation.id, &text).await {
            Ok(()) => {
                let preview: String = text.chars().take(80).collect();
                info!(
                    conversation = %conversation.id,
                    to = item.sender_label(),
                    reply = %preview,
                    "Replied"
                );
                report.replied += 1;
            }
            Err(e) => {
                warn!(
                    conversation = %conversation.id,
                    item = %item.id,
                    error = %e,
                    "Failed to send reply"
                );
                report.send_failures += 1;
            }
        }
    }

    /// Run `n` cycles back to back, without sleeping.
    pub async fn run_cycles(&mut self, n: usize) -> Vec<CycleReport> {
        let mut reports = Vec::with_capacity(n);
        for _ in 0..n {
            let report = self.run_cycle().await;
            report.log();
            reports.push(report);
        }
        reports
    }

    /// Poll until `cancel` fires. Cancellation interrupts the sleep between
    /// cycles; a cycle in progress runs to completion first.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            channel = self.inbox.name(),
            poll_secs = self.config.poll_interval.as_secs_f64(),
            known_ids = self.seen.len(),
            "Responder started"
        );

        while !cancel.is_cancelled() {
            self.run_cycle().await.log();

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        if let Err(e) = self.store.save(&self.seen).await {
            error!(error = %e, "Failed to persist seen ids on shutdown");
        }
        info!("Responder shutting down");
    }
}

/// Spawn the responder loop as a background task.
pub fn spawn_responder(responder: Responder, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(responder.run(cancel))
}

/// Pick a random pause in `[send_delay_min, send_delay_max]`.
fn send_delay(config: &DispatchConfig) -> Duration {
    let (min, max) = (config.send_delay_min, config.send_delay_max);
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}
