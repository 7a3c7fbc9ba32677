//! Per-connection bookkeeping of open streams.

use std::collections::HashMap;

use crate::engine::StreamId;
use crate::protocol::{BodyWriter, Request, Response};

/// State of one exchange, from its first header block until it is closed.
#[derive(Debug, Default)]
pub(crate) struct Stream {
    pub(crate) request: Request,
    pub(crate) response: Response,
    /// Present once the response has been submitted with a body
    pub(crate) writer: Option<BodyWriter>,
    pub(crate) dispatched: bool,
    pub(crate) responded: bool,
}

/// Open streams keyed by id. An id is present from begin-headers until the
/// stream is closed and never twice.
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    streams: HashMap<StreamId, Stream>,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh stream, returns false if the id is already open.
    pub(crate) fn insert(&mut self, stream_id: StreamId) -> bool {
        if self.streams.contains_key(&stream_id) {
            return false;
        }
        self.streams.insert(stream_id, Stream::default());
        true
    }

    pub(crate) fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub(crate) fn remove(&mut self, stream_id: StreamId) -> Option<Stream> {
        self.streams.remove(&stream_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_id_is_never_present_twice() {
        let mut table = StreamTable::new();
        assert!(table.insert(1));
        assert!(!table.insert(1));
        assert!(table.insert(3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn removed_streams_are_gone() {
        let mut table = StreamTable::new();
        table.insert(5);
        table.get_mut(5).unwrap().dispatched = true;

        let stream = table.remove(5).unwrap();
        assert!(stream.dispatched);
        assert!(table.get_mut(5).is_none());
        assert!(table.remove(5).is_none());
        assert_eq!(table.len(), 0);
    }
}
