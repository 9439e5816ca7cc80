//! Seams between the reminder core and its collaborators.
//!
//! The store is implemented by the persistence layer shared with the web app;
//! senders are implemented by the channel adapters.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Candidate, DeliveryEntry, ReminderKind, ScanWindow, StoreTime, TaskId};

/// Read candidates and write sent-flags in the task store.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Current instant according to the store's clock. Read once per cycle.
    async fn now(&self) -> Result<StoreTime>;

    /// Incomplete tasks with a deadline inside `window` around `now`,
    /// joined with their owner's contact details. Read-only.
    async fn fetch_candidates(&self, now: StoreTime, window: &ScanWindow) -> Result<Vec<Candidate>>;

    /// Set the sent-flag owned by `kind`. Setting an already-set flag is a no-op.
    async fn mark_notified(&self, task_id: TaskId, kind: ReminderKind) -> Result<()>;

    /// Persist one channel attempt. Stores without a delivery log ignore it.
    async fn record_delivery(&self, _entry: &DeliveryEntry) -> Result<()> {
        Ok(())
    }
}

/// Chat delivery (Telegram).
#[async_trait]
pub trait ChatSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send_chat_message(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Email delivery.
#[async_trait]
pub trait EmailSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send_email(&self, address: &str, subject: &str, html_body: &str) -> Result<()>;
}
