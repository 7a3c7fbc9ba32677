//! Binding to the HTTP/2 protocol engine.
//!
//! The byte-level protocol (frame parsing, header compression, flow control) is not
//! implemented in this crate. It is delegated to a protocol engine that is driven
//! sans-I/O: the connection feeds received bytes in, drains pending output bytes
//! out, and submits responses. The engine reports what it parsed by calling back
//! into a [`SessionCallbacks`] implementation that is passed explicitly on every
//! call, so the engine never holds a pointer back into the connection.
//!
//! # Components
//!
//! - [`Session`]: the capability surface the connection drives
//! - [`SessionCallbacks`]: the capability surface the engine calls back through
//! - [`H2Session`]: a [`Session`] backed by the `h2` crate
//!
//! The event vocabulary ([`FrameInfo`], [`HeaderField`], [`DataChunk`], [`Setting`])
//! is engine agnostic, which keeps the adapter and the connection testable against
//! scripted sessions.

mod error;
mod h2_session;

pub use error::CallbackError;
pub use error::EngineError;
pub use h2_session::H2Session;

use bytes::Bytes;

/// Identifier of a stream, assigned by the engine when an exchange begins.
pub type StreamId = u32;

/// Result type returned by every [`SessionCallbacks`] method.
pub type CallbackResult<T = ()> = Result<T, CallbackError>;

/// HTTP/2 `NO_ERROR` code, reported on streams that closed normally.
pub const NO_ERROR: u32 = 0x0;

/// HTTP/2 `INTERNAL_ERROR` code.
pub const INTERNAL_ERROR: u32 = 0x2;

/// Kind of a frame the engine received.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Headers,
}

/// Category of a header block, only meaningful for [`FrameKind::Headers`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeadersCategory {
    /// The header block that opens a new request stream
    Request,
    /// A response header block
    Response,
}

/// Description of a received frame, handed to the callbacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub stream_id: StreamId,
    pub kind: FrameKind,
    pub category: Option<HeadersCategory>,
    pub end_stream: bool,
}

impl FrameInfo {
    /// A HEADERS frame that opens a request stream.
    pub fn request_headers(stream_id: StreamId, end_stream: bool) -> Self {
        Self { stream_id, kind: FrameKind::Headers, category: Some(HeadersCategory::Request), end_stream }
    }

    /// A DATA frame.
    pub fn data(stream_id: StreamId, end_stream: bool) -> Self {
        Self { stream_id, kind: FrameKind::Data, category: None, end_stream }
    }

    /// Returns true if this frame opens a request stream.
    #[inline]
    pub fn is_request_headers(&self) -> bool {
        self.kind == FrameKind::Headers && self.category == Some(HeadersCategory::Request)
    }

    /// Returns true if this frame finishes the peer's side of the stream.
    #[inline]
    pub fn ends_request(&self) -> bool {
        matches!(self.kind, FrameKind::Data | FrameKind::Headers) && self.end_stream
    }
}

/// One outbound name/value pair, borrowed from the response that owns it.
///
/// The bytes are only borrowed for the duration of the submit call, an engine
/// that needs them later copies them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeaderField<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> HeaderField<'a> {
    pub fn new(name: &'a [u8], value: &'a [u8]) -> Self {
        Self { name, value }
    }
}

/// Settings the server advertises in its connection preface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Setting {
    MaxConcurrentStreams(u32),
    EnablePush(bool),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
}

/// A chunk of response body handed to the engine by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub data: Bytes,
    /// Set when no more data follows this chunk
    pub eof: bool,
}

impl DataChunk {
    /// The end of the body, without data.
    pub fn eof() -> Self {
        Self { data: Bytes::new(), eof: true }
    }
}

/// Events the engine reports while processing input or producing output.
///
/// All methods are invoked on the task that called into the [`Session`], one at a
/// time, so implementations need no synchronisation.
pub trait SessionCallbacks {
    /// A header block begins.
    fn on_begin_headers(&mut self, frame: &FrameInfo) -> CallbackResult;

    /// One header field of the block announced by [`on_begin_headers`](Self::on_begin_headers).
    fn on_header(&mut self, frame: &FrameInfo, name: &[u8], value: &[u8]) -> CallbackResult;

    /// Request body bytes arrived on a stream.
    fn on_data_chunk_recv(&mut self, stream_id: StreamId, data: &[u8]) -> CallbackResult;

    /// A frame has been fully received.
    fn on_frame_recv(&mut self, frame: &FrameInfo) -> CallbackResult;

    /// A stream is closed and will never be referenced by the engine again.
    fn on_stream_close(&mut self, stream_id: StreamId, error_code: u32) -> CallbackResult;

    /// The engine can send up to `length` body bytes on the stream.
    fn on_data_source_read(&mut self, stream_id: StreamId, length: usize) -> CallbackResult<DataChunk>;
}

/// The protocol engine surface driven by the connection.
pub trait Session {
    /// Queues the server connection preface with the given settings.
    fn submit_settings(&mut self, settings: &[Setting]) -> Result<(), EngineError>;

    /// Processes received bytes, returns how many bytes were consumed.
    ///
    /// Consuming fewer bytes than given is backpressure: the caller keeps the rest
    /// and submits it again once pending output has been drained.
    fn mem_recv(&mut self, data: &[u8], callbacks: &mut dyn SessionCallbacks) -> Result<usize, EngineError>;

    /// Returns the bytes that are pending transmission.
    ///
    /// The returned view is only valid until the next call into the session.
    fn mem_send(&mut self, callbacks: &mut dyn SessionCallbacks) -> Result<&[u8], EngineError>;

    /// Queues a response header block, the body (if any) is pulled through
    /// [`SessionCallbacks::on_data_source_read`].
    fn submit_response(&mut self, stream_id: StreamId, headers: &[HeaderField<'_>], with_body: bool) -> Result<(), EngineError>;
}
