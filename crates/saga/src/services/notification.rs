//! Best-effort user notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers a message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &UserId, message: &str) -> Result<(), NotifyError>;
}

/// Sends a notification on a background task.
///
/// The caller never waits and never sees a delivery failure; failures are
/// only logged.
pub fn dispatch(notifier: Arc<dyn Notifier>, user_id: UserId, message: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&user_id, &message).await {
            tracing::warn!(%user_id, error = %e, "notification not delivered");
        }
    });
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &UserId, message: &str) -> Result<(), NotifyError> {
        tracing::info!(%user_id, message, "notification sent");
        Ok(())
    }
}

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: UserId,
    pub message: String,
}

/// Keeps every notification in memory, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &UserId, message: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mailbox unreachable".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                user_id: user_id.clone(),
                message: message.to_string(),
            });
        Ok(())
    }
}
