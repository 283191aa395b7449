//! Failure taxonomy for the capture and analysis pipeline.
//!
//! Provider failures are recoverable: a failed capture yields no finding for
//! that tick and a failed reply leaves the user's message unanswered. Neither
//! ever stops a sampling loop or leaves an analyzer busy.

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::models::{SessionId, SourceId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Backend down, timed out or otherwise transient; retried on the next tick.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// The window backing a session no longer exists.
    #[error("source {0} not found")]
    NotFound(SourceId),
}

impl ProviderError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        ProviderError::Unavailable(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookoutError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Serialize for ProviderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl Serialize for LookoutError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
