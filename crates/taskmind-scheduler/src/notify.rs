//! In-memory history of recent reminder deliveries.
//! Lightweight: no queue, just the last few attempts for status output.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskmind_core::types::{ChannelKind, DeliveryStatus, ReminderKind, TaskId};

const HISTORY_CAPACITY: usize = 100;

/// One delivery attempt as remembered by the running scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub task_id: TaskId,
    pub title: String,
    pub kind: ReminderKind,
    pub channel: Option<ChannelKind>,
    pub status: DeliveryStatus,
    pub detail: Option<String>,
    /// Store time of the cycle that produced it.
    pub timestamp: DateTime<Utc>,
}

/// Ring buffer of the most recent deliveries.
#[derive(Debug, Default)]
pub struct DeliveryHistory {
    entries: VecDeque<Notification>,
}

impl DeliveryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery attempt, dropping the oldest past capacity.
    pub fn record(&mut self, notification: Notification) {
        self.entries.push_back(notification);
        while self.entries.len() > HISTORY_CAPACITY {
            self.entries.pop_front();
        }
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
