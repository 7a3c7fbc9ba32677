//! Translation of engine events into stream table updates and handler calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::mpsc::UnboundedSender;
use http::header::{HOST, IF_NONE_MATCH};
use http::{HeaderName, HeaderValue, Uri};
use tracing::{debug, error, info, warn};

use super::stream_table::{Stream, StreamTable};
use crate::engine::{CallbackError, CallbackResult, DataChunk, FrameInfo, SessionCallbacks, StreamId};
use crate::handler::{AsyncResp, Handler};
use crate::protocol::{ProtocolError, Request, Response, Verb};
use crate::utils::ensure;

/// A completed response on its way back to the connection.
pub(crate) type Completion = (StreamId, Response);

/// The [`SessionCallbacks`] of one connection.
///
/// Owns the stream table. A violation is recorded in `close_reason` and reported
/// to the engine as [`CallbackError::Failure`], which ends the session.
pub(crate) struct CallbackAdapter<H> {
    table: StreamTable,
    handler: Arc<H>,
    completion_tx: UnboundedSender<Completion>,
    alive: Arc<AtomicBool>,
    close_reason: Option<ProtocolError>,
}

impl<H: Handler> CallbackAdapter<H> {
    pub(crate) fn new(handler: Arc<H>, completion_tx: UnboundedSender<Completion>, alive: Arc<AtomicBool>) -> Self {
        Self { table: StreamTable::new(), handler, completion_tx, alive, close_reason: None }
    }

    pub(crate) fn stream_mut(&mut self, stream_id: StreamId) -> Option<&mut Stream> {
        self.table.get_mut(stream_id)
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.table.len()
    }

    /// Takes the violation that made a callback fail, if any.
    pub(crate) fn take_close_reason(&mut self) -> Option<ProtocolError> {
        self.close_reason.take()
    }

    fn fail(&mut self, e: ProtocolError) -> CallbackError {
        error!(cause = %e, "protocol violation, closing connection");
        if self.close_reason.is_none() {
            self.close_reason = Some(e);
        }
        CallbackError::Failure
    }

    fn dispatch(&mut self, stream_id: StreamId) -> Result<(), ProtocolError> {
        let Some(stream) = self.table.get_mut(stream_id) else {
            return Err(ProtocolError::MissingDispatchState { stream_id });
        };
        if stream.dispatched {
            warn!(stream_id, "request was already dispatched");
            return Ok(());
        }
        stream.dispatched = true;

        let mut response = std::mem::take(&mut stream.response);

        let completion_tx = self.completion_tx.clone();
        response.set_complete_request_handler(move |res| {
            let completed = std::mem::take(res);
            if let Err(e) = completion_tx.unbounded_send((stream_id, completed)) {
                debug!(stream_id, cause = %e, "connection is gone, dropping response");
            }
        });

        let alive = Arc::clone(&self.alive);
        response.set_is_alive_helper(move || alive.load(Ordering::Acquire));

        if let Some(hash) = stream.request.header_value(IF_NONE_MATCH) {
            response.set_expected_hash(hash);
        }

        let request = &stream.request;
        info!(stream_id, method = %request.method().map_or("-", |verb| verb.as_str()), path = request.path(), "request");
        self.handler.handle(request, AsyncResp::new(response));
        Ok(())
    }
}

fn apply_header(request: &mut Request, name: &[u8], value: &[u8]) -> Result<(), ProtocolError> {
    match name {
        b":path" => {
            ensure!(!request.has_target(), ProtocolError::DuplicatePseudoHeader { name: ":path" });
            let target = Uri::try_from(value).map_err(ProtocolError::invalid_target)?;
            request.set_target(target);
        }
        b":method" => {
            ensure!(!request.has_method(), ProtocolError::DuplicatePseudoHeader { name: ":method" });
            let verb = Verb::from_bytes(value).ok_or_else(|| ProtocolError::unknown_verb(value))?;
            request.set_method(verb);
        }
        b":scheme" => {}
        b":authority" => {
            let value = HeaderValue::from_bytes(value).map_err(ProtocolError::invalid_header)?;
            request.append_header(HOST, value);
        }
        _ if name.starts_with(b":") => return Err(ProtocolError::unknown_pseudo_header(name)),
        _ => {
            let name = HeaderName::from_bytes(name).map_err(ProtocolError::invalid_header)?;
            let value = HeaderValue::from_bytes(value).map_err(ProtocolError::invalid_header)?;
            request.append_header(name, value);
        }
    }
    Ok(())
}

impl<H: Handler> SessionCallbacks for CallbackAdapter<H> {
    fn on_begin_headers(&mut self, frame: &FrameInfo) -> CallbackResult {
        if !frame.is_request_headers() {
            return Ok(());
        }
        let stream_id = frame.stream_id;
        debug!(stream_id, "begin headers");

        if !self.table.insert(stream_id) {
            return Err(self.fail(ProtocolError::DuplicateStream { stream_id }));
        }
        if let Some(stream) = self.table.get_mut(stream_id) {
            stream.request.set_secure(true);
        }
        Ok(())
    }

    fn on_header(&mut self, frame: &FrameInfo, name: &[u8], value: &[u8]) -> CallbackResult {
        if !frame.is_request_headers() {
            return Ok(());
        }
        let stream_id = frame.stream_id;

        let result = match self.table.get_mut(stream_id) {
            Some(stream) => apply_header(&mut stream.request, name, value),
            None => Err(ProtocolError::UnknownStream { stream_id }),
        };
        result.map_err(|e| self.fail(e))
    }

    fn on_data_chunk_recv(&mut self, stream_id: StreamId, data: &[u8]) -> CallbackResult {
        match self.table.get_mut(stream_id) {
            Some(stream) => {
                stream.request.extend_body(data);
                Ok(())
            }
            None => Err(self.fail(ProtocolError::UnknownStream { stream_id })),
        }
    }

    fn on_frame_recv(&mut self, frame: &FrameInfo) -> CallbackResult {
        if !frame.ends_request() {
            return Ok(());
        }
        self.dispatch(frame.stream_id).map_err(|e| self.fail(e))
    }

    fn on_stream_close(&mut self, stream_id: StreamId, error_code: u32) -> CallbackResult {
        match self.table.remove(stream_id) {
            Some(_stream) => {
                debug!(stream_id, error_code, "stream closed");
                Ok(())
            }
            None => Err(self.fail(ProtocolError::CloseUnopenedStream { stream_id })),
        }
    }

    fn on_data_source_read(&mut self, stream_id: StreamId, length: usize) -> CallbackResult<DataChunk> {
        let Some(writer) = self.table.get_mut(stream_id).and_then(|stream| stream.writer.as_mut()) else {
            warn!(stream_id, "body requested for a stream without a body");
            return Err(CallbackError::Temporal);
        };

        let chunk = match writer.pull(length) {
            Ok(chunk) => chunk,
            Err(e) => {
                error!(stream_id, cause = %e, "failed to read response body");
                return Err(CallbackError::Temporal);
            }
        };

        let produced = chunk.data.len();
        if produced > length {
            return Err(self.fail(ProtocolError::OversizedChunk { produced, length }));
        }
        Ok(DataChunk { data: chunk.data, eof: !chunk.more })
    }
}
