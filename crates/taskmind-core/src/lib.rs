//! # TaskMind Core
//! Shared types, traits, configuration and errors for the deadline reminder service.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::TaskMindConfig;
pub use error::{Result, TaskMindError};
pub use traits::{ChatSender, EmailSender, ReminderStore};
pub use types::{
    Candidate, ChannelKind, DeliveryEntry, DeliveryStatus, OwnerContact, Priority, ReminderKind,
    ScanWindow, StoreTime, Task, TaskId,
};
