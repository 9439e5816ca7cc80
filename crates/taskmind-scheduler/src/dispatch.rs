//! Reminder dispatch. Delivers one rendered reminder to every channel the
//! owner has enabled.
//!
//! Channels are independent: a failure or timeout on one never blocks the
//! other, and nothing here returns an error. The caller gets a report of
//! every attempt and decides what to persist.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taskmind_core::error::{Result, TaskMindError};
use taskmind_core::traits::{ChatSender, EmailSender};
use taskmind_core::types::{ChannelKind, DeliveryStatus, OwnerContact};

use crate::message::ReminderMessage;

/// Outcome of one channel attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAttempt {
    pub channel: ChannelKind,
    pub status: DeliveryStatus,
    pub detail: Option<String>,
}

impl ChannelAttempt {
    fn sent(channel: ChannelKind) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Sent,
            detail: None,
        }
    }

    fn failed(channel: ChannelKind, reason: String) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Failed,
            detail: Some(reason),
        }
    }

    fn skipped(channel: ChannelKind, reason: &str) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Skipped,
            detail: Some(reason.to_string()),
        }
    }
}

/// Every attempt made for one reminder. Empty when the owner has no usable
/// channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub attempts: Vec<ChannelAttempt>,
}

impl DispatchReport {
    pub fn count(&self, status: DeliveryStatus) -> usize {
        self.attempts.iter().filter(|a| a.status == status).count()
    }

    pub fn delivered(&self) -> usize {
        self.count(DeliveryStatus::Sent)
    }

    pub fn failed(&self) -> usize {
        self.count(DeliveryStatus::Failed)
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Channel senders plus a per-send timeout. A `None` sender means the channel
/// is not configured and is skipped for every task.
#[derive(Clone)]
pub struct Dispatcher {
    chat: Option<Arc<dyn ChatSender>>,
    email: Option<Arc<dyn EmailSender>>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        chat: Option<Arc<dyn ChatSender>>,
        email: Option<Arc<dyn EmailSender>>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            chat,
            email,
            send_timeout,
        }
    }

    /// Names of the configured channels, for the startup banner.
    pub fn configured_channels(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(chat) = &self.chat {
            names.push(chat.name());
        }
        if let Some(email) = &self.email {
            names.push(email.name());
        }
        names
    }

    /// Send `message` to `owner` on each channel they enabled.
    pub async fn dispatch(&self, owner: &OwnerContact, message: &ReminderMessage) -> DispatchReport {
        let telegram = async {
            if !owner.wants_telegram() {
                return None;
            }
            let chat_id = owner.telegram_chat_id.as_deref().unwrap_or_default().trim();
            Some(match &self.chat {
                Some(sender) => {
                    self.attempt(
                        ChannelKind::Telegram,
                        sender.send_chat_message(chat_id, &message.chat_text),
                    )
                    .await
                }
                None => ChannelAttempt::skipped(ChannelKind::Telegram, "telegram channel not configured"),
            })
        };

        let email = async {
            if !owner.wants_email() {
                return None;
            }
            let address = owner.email.as_deref().unwrap_or_default().trim();
            Some(match &self.email {
                Some(sender) => {
                    self.attempt(
                        ChannelKind::Email,
                        sender.send_email(address, &message.email_subject, &message.email_html),
                    )
                    .await
                }
                None => ChannelAttempt::skipped(ChannelKind::Email, "email channel not configured"),
            })
        };

        let (telegram, email) = tokio::join!(telegram, email);
        DispatchReport {
            attempts: telegram.into_iter().chain(email).collect(),
        }
    }

    /// Run one send under the timeout and fold the result into an attempt.
    async fn attempt<F>(&self, channel: ChannelKind, send: F) -> ChannelAttempt
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => ChannelAttempt::sent(channel),
            Ok(Err(e)) => ChannelAttempt::failed(channel, e.to_string()),
            Err(_) => {
                let err = TaskMindError::Timeout(format!(
                    "{channel} send after {}s",
                    self.send_timeout.as_secs_f32()
                ));
                ChannelAttempt::failed(channel, err.to_string())
            }
        }
    }
}
