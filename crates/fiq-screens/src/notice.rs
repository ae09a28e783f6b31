//! Non-fatal user notifications.
//!
//! Background saves and fetches never propagate errors to the caller; they
//! report through a [`NoticeSink`] and degrade to "not saved" / "no data".

use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::error::ScreenError;

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational, e.g. a completed export.
    Info,
    /// A required precondition is missing; the operation did not run.
    Precondition,
    /// An operation failed; state was left as before.
    Error,
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Human-readable text.
    pub message: String,
}

impl Notice {
    /// Informational notice.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    /// Missing-precondition notice.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Precondition,
            message: message.into(),
        }
    }

    /// Failure notice prefixed with what was being done.
    #[must_use]
    pub fn failure(action: &str, err: &ScreenError) -> Self {
        let level = match err {
            ScreenError::Precondition(_) => NoticeLevel::Precondition,
            _ => NoticeLevel::Error,
        };
        Self {
            level,
            message: format!("{action}: {err}"),
        }
    }
}

/// Receiver of notices.
pub trait NoticeSink: Send + Sync {
    /// Delivers one notice. Must not block.
    fn notify(&self, notice: Notice);
}

impl NoticeSink for UnboundedSender<Notice> {
    fn notify(&self, notice: Notice) {
        // The UI may already be gone; nothing to do then.
        let _ = self.send(notice);
    }
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotices;

impl NoticeSink for LogNotices {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!("{}", notice.message),
            NoticeLevel::Precondition | NoticeLevel::Error => warn!("{}", notice.message),
        }
    }
}
