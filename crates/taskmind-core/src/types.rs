//! Domain types: tasks, their owners, and the reminder thresholds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Row id of a task in the shared store.
pub type TaskId = i64;

/// Eisenhower-matrix priority of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    DoFirst,
    Schedule,
    Delegate,
    Eliminate,
    /// Value written by the CRUD layer that this service doesn't know about.
    Other(String),
}

impl Priority {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "do_first" => Priority::DoFirst,
            "schedule" => Priority::Schedule,
            "delegate" => Priority::Delegate,
            "eliminate" => Priority::Eliminate,
            other => Priority::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Priority::DoFirst => "do_first",
            Priority::Schedule => "schedule",
            Priority::Delegate => "delegate",
            Priority::Eliminate => "eliminate",
            Priority::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A student task as seen by the reminder service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: i64,
    pub title: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    /// Absolute deadline, normalized to UTC by the store.
    pub deadline: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub is_completed: bool,
    /// Set once the 24-hour reminder was attempted. Never cleared.
    pub notified_24h: bool,
    /// Set once the final reminder was attempted. Never cleared.
    pub notified_1h: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Hours until the deadline at `now`; negative once overdue.
    pub fn hours_remaining(&self, now: StoreTime) -> Option<f64> {
        let deadline = self.deadline?;
        let ms = (deadline - now.get()).num_milliseconds();
        Some(ms as f64 / 3_600_000.0)
    }
}

/// Notification target: the owner of a task and their channel preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerContact {
    pub user_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_enabled: bool,
    pub email_enabled: bool,
}

impl OwnerContact {
    pub fn wants_telegram(&self) -> bool {
        self.telegram_enabled && non_blank(&self.telegram_chat_id)
    }

    pub fn wants_email(&self) -> bool {
        self.email_enabled && non_blank(&self.email)
    }

    pub fn has_any_channel(&self) -> bool {
        self.wants_telegram() || self.wants_email()
    }
}

fn non_blank(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// A task returned by the deadline scan, joined with its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub task: Task,
    pub owner: OwnerContact,
}

/// Reminder threshold. Each kind owns exactly one sent-flag on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    /// Sent roughly a day before the deadline.
    TwentyFourHour,
    /// Final reminder, sent in the last hours (or just after the deadline).
    OneHour,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::TwentyFourHour => "24h",
            ReminderKind::OneHour => "1h",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "24h" => Some(ReminderKind::TwentyFourHour),
            "1h" => Some(ReminderKind::OneHour),
            _ => None,
        }
    }

    /// Whether this threshold was already handled for `task`.
    pub fn is_flag_set(&self, task: &Task) -> bool {
        match self {
            ReminderKind::TwentyFourHour => task.notified_24h,
            ReminderKind::OneHour => task.notified_1h,
        }
    }
}

impl std::fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instant read from the task store's clock.
///
/// Deadlines are written and compared with the store's time functions, so the
/// scheduler classifies against this rather than the process clock. Engine
/// code gets one from [`ReminderStore::now`](crate::traits::ReminderStore::now).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StoreTime(DateTime<Utc>);

impl StoreTime {
    /// Wrap a timestamp obtained from the store's own clock. Meant for
    /// `ReminderStore` implementations; nothing stops other callers.
    #[doc(hidden)]
    pub fn from_store(ts: DateTime<Utc>) -> Self {
        Self(ts)
    }

    pub fn get(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for StoreTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

/// Deadline range covered by one scan: `[now - grace, now + lookahead]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub grace: Duration,
    pub lookahead: Duration,
}

impl ScanWindow {
    pub fn new(grace: Duration, lookahead: Duration) -> Self {
        Self { grace, lookahead }
    }

    pub fn bounds(&self, now: StoreTime) -> (DateTime<Utc>, DateTime<Utc>) {
        (now.get() - self.grace, now.get() + self.lookahead)
    }
}

impl Default for ScanWindow {
    fn default() -> Self {
        Self {
            grace: Duration::hours(1),
            lookahead: Duration::hours(30),
        }
    }
}

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Telegram,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Email => "email",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

/// One channel attempt for one reminder, as written to the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEntry {
    pub task_id: TaskId,
    pub kind: ReminderKind,
    /// `None` when the owner had no usable channel at all.
    pub channel: Option<ChannelKind>,
    pub status: DeliveryStatus,
    pub detail: Option<String>,
}
