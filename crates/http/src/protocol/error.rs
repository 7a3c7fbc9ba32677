use std::io;
use thiserror::Error;

use crate::engine::{EngineError, StreamId};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },

    #[error("engine error: {source}")]
    Engine {
        #[from]
        source: EngineError,
    },

    #[error("response error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: io::Error,
    },
}

/// Violations of the exchange rules, each one closes the connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("stream {stream_id} is not open")]
    UnknownStream { stream_id: StreamId },

    #[error("stream {stream_id} is already open")]
    DuplicateStream { stream_id: StreamId },

    #[error("closed stream {stream_id} was never opened")]
    CloseUnopenedStream { stream_id: StreamId },

    #[error("unknown http verb: {verb}")]
    UnknownVerb { verb: String },

    #[error("duplicate pseudo-header {name}")]
    DuplicatePseudoHeader { name: &'static str },

    #[error("unknown pseudo-header {name}")]
    UnknownPseudoHeader { name: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid request target: {reason}")]
    InvalidTarget { reason: String },

    #[error("engine consumed {consumed} of {submitted} received bytes")]
    ReceiveMismatch { consumed: usize, submitted: usize },

    #[error("body chunk of {produced} bytes exceeds the {length} bytes requested")]
    OversizedChunk { produced: usize, length: usize },

    #[error("stream {stream_id} has no dispatch state")]
    MissingDispatchState { stream_id: StreamId },
}

impl ProtocolError {
    pub fn unknown_verb(verb: &[u8]) -> Self {
        Self::UnknownVerb { verb: String::from_utf8_lossy(verb).into_owned() }
    }

    pub fn unknown_pseudo_header(name: &[u8]) -> Self {
        Self::UnknownPseudoHeader { name: String::from_utf8_lossy(name).into_owned() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_target<S: ToString>(str: S) -> Self {
        Self::InvalidTarget { reason: str.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
