//! User-facing notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

/// A transient, human-readable message about an operation outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Handle for emitting notifications.
///
/// This is cheaply cloneable and can be shared across tasks. Emitting with no
/// subscriber is not an error.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, level: NotificationLevel, message: impl Into<String>) {
        let notification = Notification {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        };
        match level {
            NotificationLevel::Error => tracing::warn!(message = %notification.message, "Notification"),
            _ => tracing::debug!(message = %notification.message, "Notification"),
        }
        // No subscribers is fine
        let _ = self.tx.send(notification);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(NotificationLevel::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(NotificationLevel::Error, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NotificationLevel::Info, message);
    }
}
