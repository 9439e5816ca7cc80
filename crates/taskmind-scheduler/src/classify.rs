//! Threshold classifier: decides which reminder, if any, a task is due for.
//!
//! Bands are inclusive on both ends and wider than the polling interval so a
//! task can't slip through a threshold between two scans:
//!
//! ```text
//!   hours remaining:  -grace ....... 4          20 ........ 27
//!                     [  final (1h)  ]          [    24h     ]
//! ```
//!
//! A task first seen below 20h never gets a late 24h reminder; only the
//! final one fires. That lost reminder is accepted behavior.

use taskmind_core::config::{ONE_HOUR_BAND_END, TWENTY_FOUR_HOUR_BAND_END};
use taskmind_core::types::{ReminderKind, StoreTime, Task};

/// Lower edge of the 24-hour band, in hours.
pub const TWENTY_FOUR_HOUR_BAND_START: f64 = 20.0;

/// Outcome of classifying one task at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Send `kind` now.
    Send { kind: ReminderKind, hours_remaining: f64 },
    /// Inside the band for `kind`, but its flag is already set.
    AlreadyNotified(ReminderKind),
    /// Between or beyond the bands.
    OutsideBands { hours_remaining: f64 },
    Completed,
    NoDeadline,
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdClassifier {
    overdue_grace_hours: f64,
}

impl ThresholdClassifier {
    /// `overdue_grace_hours` extends the final band below zero so a task
    /// whose deadline passed just before the scan still gets its reminder.
    pub fn new(overdue_grace_hours: f64) -> Self {
        Self {
            overdue_grace_hours: overdue_grace_hours.max(0.0),
        }
    }

    /// Inclusive `(low, high)` hour range for `kind`.
    pub fn band(&self, kind: ReminderKind) -> (f64, f64) {
        match kind {
            ReminderKind::TwentyFourHour => (TWENTY_FOUR_HOUR_BAND_START, TWENTY_FOUR_HOUR_BAND_END),
            ReminderKind::OneHour => (-self.overdue_grace_hours, ONE_HOUR_BAND_END),
        }
    }

    /// Band containing `hours_remaining`, checked 24h first.
    pub fn band_for(&self, hours_remaining: f64) -> Option<ReminderKind> {
        [ReminderKind::TwentyFourHour, ReminderKind::OneHour]
            .into_iter()
            .find(|kind| {
                let (low, high) = self.band(*kind);
                hours_remaining >= low && hours_remaining <= high
            })
    }

    pub fn classify(&self, task: &Task, now: StoreTime) -> Decision {
        if task.is_completed {
            return Decision::Completed;
        }
        let Some(hours_remaining) = task.hours_remaining(now) else {
            return Decision::NoDeadline;
        };
        match self.band_for(hours_remaining) {
            Some(kind) if kind.is_flag_set(task) => Decision::AlreadyNotified(kind),
            Some(kind) => Decision::Send {
                kind,
                hours_remaining,
            },
            None => Decision::OutsideBands { hours_remaining },
        }
    }
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self::new(1.0)
    }
}
