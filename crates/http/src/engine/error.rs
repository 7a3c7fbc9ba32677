use std::io;
use thiserror::Error;

use super::StreamId;

/// Failure signal a callback returns to the engine.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// The session can not continue, the engine aborts processing.
    #[error("callback failure")]
    Failure,

    /// Only the current stream is affected, the engine resets it.
    #[error("temporal callback failure")]
    Temporal,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("callback failure")]
    CallbackFailure,

    #[error("invalid stream {stream_id}")]
    InvalidStream { stream_id: StreamId },

    #[error("settings were already submitted")]
    SettingsSubmitted,

    #[error("invalid setting: {reason}")]
    InvalidSetting { reason: String },

    #[error("invalid header block: {reason}")]
    InvalidHeaderBlock { reason: String },

    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: h2::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl EngineError {
    pub fn invalid_stream(stream_id: StreamId) -> Self {
        Self::InvalidStream { stream_id }
    }

    pub fn invalid_setting<S: ToString>(str: S) -> Self {
        Self::InvalidSetting { reason: str.to_string() }
    }

    pub fn invalid_header_block<S: ToString>(str: S) -> Self {
        Self::InvalidHeaderBlock { reason: str.to_string() }
    }
}
