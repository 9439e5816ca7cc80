//! # TaskMind Scheduler
//!
//! Deadline reminder loop for TaskMind tasks.
//!
//! ## Architecture
//! ```text
//! ReminderScheduler (tokio interval, no overlapping cycles)
//!   └── ReminderEngine::tick
//!         ├── store.now()                  one snapshot per cycle
//!         ├── store.fetch_candidates(now)  open tasks in [now - grace, now + lookahead]
//!         ├── ThresholdClassifier          24h band [20, 27], final band [-grace, 4]
//!         ├── MessageRenderer              Telegram HTML + HTML email
//!         ├── Dispatcher                   Telegram ∥ Email, per-send timeout
//!         └── store.mark_notified(kind)    after the attempt, success or not
//! ```

pub mod classify;
pub mod dispatch;
pub mod engine;
pub mod message;
pub mod notify;
pub mod persistence;

#[cfg(test)]
mod testing;

pub use classify::{Decision, ThresholdClassifier};
pub use dispatch::{ChannelAttempt, DispatchReport, Dispatcher};
pub use engine::{CycleReport, Preview, ReminderEngine, ReminderScheduler, SchedulerStats, TickOutcome};
pub use message::{MessageRenderer, ReminderMessage};
pub use notify::{DeliveryHistory, Notification};
pub use persistence::{DeliveryLogRow, ReminderDb};
