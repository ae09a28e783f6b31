//! Screen editor errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced by the backend seam, config loading and editor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreenError {
    /// Backend answered with a non-success status.
    #[error("backend returned HTTP {status} for {path}")]
    Http { status: u16, path: SmolStr },

    /// Connection, timeout or I/O failure before a status was received.
    #[error("transport error: {0}")]
    Transport(SmolStr),

    /// Response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(SmolStr),

    /// Configuration file or value is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),

    /// Operation skipped because required context is missing.
    #[error("{0}")]
    Precondition(SmolStr),

    /// Widget id is not present in the registry.
    #[error("unknown widget '{0}'")]
    UnknownWidget(SmolStr),
}

impl ScreenError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string().into())
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string().into())
    }

    /// Returns true for failures a later retry may fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            _ => false,
        }
    }
}
