//! Error types for operator intents.

use thiserror::Error;

use crate::mqtt::config::ProfileError;
use crate::mqtt::session::SessionError;
use crate::persistence::StoreError;

/// Why an operator intent had no bus effect.
///
/// None of these are fatal. Precondition variants mean the intent was a
/// no-op; the presentation layer should already have the control disabled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntentError {
    /// Session is not in the connected state
    #[error("not connected")]
    NotConnected,

    /// Emergency lockout suppresses all control output
    #[error("controls locked by emergency flag")]
    Lockout,

    #[error("no recipe slot selected")]
    NoSelection,

    #[error("recipe slot {0} does not exist")]
    InvalidSlot(u8),

    #[error("angle {0} is outside the servo range")]
    AngleOutOfRange(f64),

    #[error("no accepted AI draft to apply")]
    NoAcceptedDraft,

    #[error("invalid connection profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    /// The transport refused the request
    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The console runtime is gone
    #[error("console stopped")]
    Stopped,
}

impl From<SessionError> for IntentError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotConnected => IntentError::NotConnected,
            SessionError::Profile(p) => IntentError::InvalidProfile(p),
            SessionError::Transport(t) => IntentError::Transport(t.to_string()),
        }
    }
}

impl From<StoreError> for IntentError {
    fn from(e: StoreError) -> Self {
        IntentError::Storage(e.to_string())
    }
}
