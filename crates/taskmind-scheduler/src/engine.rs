//! Reminder engine: one scan cycle, and the interval loop that drives it.
//!
//! A cycle reads "now" from the store once, fetches candidates, classifies
//! each against that snapshot, dispatches and sets the sent-flag. Cycles never
//! overlap: a tick that finds the previous cycle still running is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use taskmind_core::config::TaskMindConfig;
use taskmind_core::error::Result;
use taskmind_core::traits::ReminderStore;
use taskmind_core::types::{
    Candidate, DeliveryEntry, DeliveryStatus, ReminderKind, ScanWindow, StoreTime, Task, TaskId,
};

use crate::classify::{Decision, ThresholdClassifier};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::message::{MessageRenderer, ReminderMessage};
use crate::notify::{DeliveryHistory, Notification};

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Store time the cycle classified against.
    pub now: Option<DateTime<Utc>>,
    pub scanned: usize,
    /// Reminders attempted (one per task and kind).
    pub reminders: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub mark_failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed(CycleReport),
    /// The previous cycle was still running.
    Skipped,
    /// The cycle aborted before processing any task.
    Failed(String),
}

/// Lifetime counters for the running engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub skipped_ticks: u64,
    pub reminders: u64,
    pub delivered: u64,
    pub failed_deliveries: u64,
    pub mark_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Result of previewing a reminder for one task.
#[derive(Debug, Clone)]
pub struct Preview {
    pub decision: Decision,
    pub message: Option<ReminderMessage>,
}

struct ReminderOutcome {
    task_id: TaskId,
    title: String,
    kind: ReminderKind,
    report: DispatchReport,
    marked: bool,
}

pub struct ReminderEngine {
    store: Arc<dyn ReminderStore>,
    classifier: ThresholdClassifier,
    renderer: MessageRenderer,
    dispatcher: Dispatcher,
    window: ScanWindow,
    max_concurrent: usize,
    cycle_lock: Mutex<()>,
    history: std::sync::Mutex<DeliveryHistory>,
    stats: std::sync::Mutex<SchedulerStats>,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        classifier: ThresholdClassifier,
        renderer: MessageRenderer,
        dispatcher: Dispatcher,
        window: ScanWindow,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            classifier,
            renderer,
            dispatcher,
            window,
            max_concurrent: max_concurrent.max(1),
            cycle_lock: Mutex::new(()),
            history: std::sync::Mutex::new(DeliveryHistory::new()),
            stats: std::sync::Mutex::new(SchedulerStats::default()),
        }
    }

    pub fn from_config(store: Arc<dyn ReminderStore>, dispatcher: Dispatcher, config: &TaskMindConfig) -> Self {
        Self::new(
            store,
            ThresholdClassifier::new(config.scheduler.overdue_grace_hours()),
            MessageRenderer::from_config(&config.reminders),
            dispatcher,
            config.scheduler.scan_window(),
            config.scheduler.max_concurrent_dispatches,
        )
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run a cycle unless one is already in flight.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::warn!("⏭️ Previous reminder cycle still running, skipping tick");
            self.with_stats(|s| s.skipped_ticks += 1);
            return TickOutcome::Skipped;
        };
        match self.execute().await {
            Ok(report) => TickOutcome::Completed(report),
            Err(e) => TickOutcome::Failed(e.to_string()),
        }
    }

    /// Run a cycle, waiting for any in-flight one to finish first.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;
        self.execute().await
    }

    async fn execute(&self) -> Result<CycleReport> {
        match self.cycle().await {
            Ok(report) => {
                self.with_stats(|s| {
                    s.cycles += 1;
                    s.reminders += report.reminders as u64;
                    s.delivered += report.delivered as u64;
                    s.failed_deliveries += report.failed as u64;
                    s.mark_failures += report.mark_failures as u64;
                    s.last_cycle_at = report.now;
                });
                Ok(report)
            }
            Err(e) => {
                tracing::error!("❌ Reminder cycle aborted: {e}");
                self.with_stats(|s| s.failed_cycles += 1);
                Err(e)
            }
        }
    }

    async fn cycle(&self) -> Result<CycleReport> {
        let now = self.store.now().await?;
        let candidates = self.store.fetch_candidates(now, &self.window).await?;
        tracing::info!("🔍 Reminder scan at {now}: {} candidate task(s)", candidates.len());

        let mut report = CycleReport {
            now: Some(now.get()),
            scanned: candidates.len(),
            ..Default::default()
        };

        let pending: Vec<_> = candidates
            .into_iter()
            .map(|candidate| self.process(candidate, now))
            .collect();
        let outcomes: Vec<Option<ReminderOutcome>> = stream::iter(pending)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            report.reminders += 1;
            report.delivered += outcome.report.delivered();
            report.failed += outcome.report.failed();
            report.skipped += outcome.report.count(DeliveryStatus::Skipped);
            if outcome.report.is_empty() {
                report.skipped += 1;
            }
            if !outcome.marked {
                report.mark_failures += 1;
            }
            self.remember(&outcome, now);
        }

        if report.reminders > 0 {
            tracing::info!(
                "📣 Reminder cycle: {} reminder(s), {} delivered, {} failed, {} skipped",
                report.reminders,
                report.delivered,
                report.failed,
                report.skipped
            );
        }
        Ok(report)
    }

    /// Classify, render, dispatch and flag one candidate.
    async fn process(&self, candidate: Candidate, now: StoreTime) -> Option<ReminderOutcome> {
        let Candidate { task, owner } = candidate;
        let (kind, hours_remaining) = match self.classifier.classify(&task, now) {
            Decision::Send { kind, hours_remaining } => (kind, hours_remaining),
            _ => return None,
        };

        let message = self.renderer.render(&task, kind, hours_remaining);
        let report = if owner.has_any_channel() {
            self.dispatcher.dispatch(&owner, &message).await
        } else {
            DispatchReport::default()
        };

        for attempt in &report.attempts {
            match attempt.status {
                DeliveryStatus::Sent => {
                    tracing::info!("✅ {kind} reminder for task {} sent via {}", task.id, attempt.channel)
                }
                DeliveryStatus::Failed => tracing::warn!(
                    "⚠️ {kind} reminder for task {} failed via {}: {}",
                    task.id,
                    attempt.channel,
                    attempt.detail.as_deref().unwrap_or("unknown error")
                ),
                DeliveryStatus::Skipped => tracing::debug!(
                    "{kind} reminder for task {} skipped on {}: {}",
                    task.id,
                    attempt.channel,
                    attempt.detail.as_deref().unwrap_or("")
                ),
            }
        }
        if report.is_empty() {
            tracing::info!("🔕 Task {} owner has no usable channel, marking {kind} as handled", task.id);
        }

        // Flag after the attempt, whatever each channel returned.
        let marked = match self.store.mark_notified(task.id, kind).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("⚠️ Failed to set {kind} flag for task {} (may resend next cycle): {e}", task.id);
                false
            }
        };

        for entry in delivery_entries(task.id, kind, &report) {
            if let Err(e) = self.store.record_delivery(&entry).await {
                tracing::warn!("⚠️ Failed to log delivery for task {}: {e}", task.id);
            }
        }

        Some(ReminderOutcome {
            task_id: task.id,
            title: task.title,
            kind,
            report,
            marked,
        })
    }

    fn remember(&self, outcome: &ReminderOutcome, now: StoreTime) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        for entry in delivery_entries(outcome.task_id, outcome.kind, &outcome.report) {
            history.record(Notification {
                task_id: entry.task_id,
                title: outcome.title.clone(),
                kind: entry.kind,
                channel: entry.channel,
                status: entry.status,
                detail: entry.detail,
                timestamp: now.get(),
            });
        }
    }

    /// Render what `task` would receive at `now`. A forced `kind` renders
    /// regardless of bands and flags.
    pub fn preview(&self, task: &Task, now: StoreTime, kind: Option<ReminderKind>) -> Preview {
        let decision = self.classifier.classify(task, now);
        let message = match (kind, decision) {
            (Some(kind), _) => {
                let hours = task.hours_remaining(now).unwrap_or(0.0);
                Some(self.renderer.render(task, kind, hours))
            }
            (None, Decision::Send { kind, hours_remaining }) => {
                Some(self.renderer.render(task, kind, hours_remaining))
            }
            (None, _) => None,
        };
        Preview { decision, message }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Recent deliveries, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history.lock().map(|h| h.entries()).unwrap_or_default()
    }

    fn with_stats(&self, f: impl FnOnce(&mut SchedulerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/// Log entries for one reminder; a single skipped entry when nothing was attempted.
fn delivery_entries(task_id: TaskId, kind: ReminderKind, report: &DispatchReport) -> Vec<DeliveryEntry> {
    if report.is_empty() {
        return vec![DeliveryEntry {
            task_id,
            kind,
            channel: None,
            status: DeliveryStatus::Skipped,
            detail: Some("no usable channel".into()),
        }];
    }
    report
        .attempts
        .iter()
        .map(|a| DeliveryEntry {
            task_id,
            kind,
            channel: Some(a.channel),
            status: a.status,
            detail: a.detail.clone(),
        })
        .collect()
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the interval loop. The first cycle runs as soon as it starts.
pub struct ReminderScheduler {
    engine: Arc<ReminderEngine>,
    interval: Duration,
    running: Option<RunningLoop>,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<ReminderEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval: interval.max(Duration::from_millis(10)),
            running: None,
        }
    }

    pub fn engine(&self) -> &Arc<ReminderEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the loop. No-op if already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        tracing::info!("⏰ Reminder scheduler started (check every {}s)", self.interval.as_secs_f32());

        let (shutdown, mut stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.tick().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        self.running = Some(RunningLoop { shutdown, handle });
    }

    /// Stop the loop, letting an in-flight cycle finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::warn!("⚠️ Scheduler loop ended abnormally: {e}");
        }
        tracing::info!("🛑 Reminder scheduler stopped");
    }
}
