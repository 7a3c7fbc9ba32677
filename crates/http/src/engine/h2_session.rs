//! [`Session`] backed by the `h2` crate.
//!
//! `h2` owns an I/O object and makes progress when polled. To use it as a sans-I/O
//! engine the session hands it one end of an in-memory pipe: received bytes are
//! written into the pipe, pending output is read back out of it, and the protocol
//! state is polled with a no-op waker on every call into the session.
//!
//! The pipe takes part in tokio's cooperative scheduling budget. Once a task has
//! spent its budget the pipe reports `Pending` even when it could make progress,
//! and the no-op waker never hears about it. A session must therefore be driven
//! from a task running under [`tokio::task::unconstrained`], as
//! [`Http2Connection::process`](crate::connection::Http2Connection::process) does.
//!
//! A full pipe is backpressure: [`Session::mem_recv`] consumes fewer bytes than
//! it was given and the caller feeds the rest again after draining output.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::task::noop_waker_ref;
use h2::server::{Builder, Connection, Handshake, SendResponse};
use h2::{Reason, RecvStream, SendStream};
use http::{HeaderName, HeaderValue, Response, StatusCode};
use tokio::io::{AsyncWrite, DuplexStream};
use tokio_util::io::poll_read_buf;
use tracing::{debug, error, warn};

use super::{
    CallbackError, CallbackResult, EngineError, FrameInfo, HeaderField, Session, SessionCallbacks, Setting, StreamId, INTERNAL_ERROR,
    NO_ERROR,
};

const PIPE_CAPACITY: usize = 256 * 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024;
const OUTPUT_RESERVE: usize = 16 * 1024;
const MAX_OUTPUT: usize = 256 * 1024;

const MIN_FRAME_SIZE: u32 = 16_384;
const MAX_FRAME_SIZE: u32 = 16_777_215;
const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

enum State {
    Idle(Builder, DuplexStream),
    Handshaking(Pin<Box<Handshake<DuplexStream, Bytes>>>),
    Serving(Connection<DuplexStream, Bytes>),
    Closed,
}

#[derive(Default)]
struct StreamIo {
    recv: Option<RecvStream>,
    respond: Option<SendResponse<Bytes>>,
    send: Option<SendStream<Bytes>>,
}

/// What polling one stream body produced.
enum BodyPoll {
    Idle,
    Progressed,
    Finished,
    /// The stream must be reset with the reason
    Reset(Reason),
    /// The peer is gone, the stream closed with the code
    Gone(u32),
}

pub struct H2Session {
    state: State,
    pipe: DuplexStream,
    streams: HashMap<StreamId, StreamIo>,
    // closes not yet reported through on_stream_close
    closed: Vec<(StreamId, u32)>,
    output: BytesMut,
    // length of the view returned by the last mem_send
    returned: usize,
}

impl H2Session {
    pub fn new() -> Self {
        let (pipe, engine_io) = tokio::io::duplex(PIPE_CAPACITY);
        Self { state: State::Idle(Builder::new(), engine_io), pipe, streams: HashMap::new(), closed: Vec::new(), output: BytesMut::new(), returned: 0 }
    }

    fn ensure_started(&mut self) -> Result<(), EngineError> {
        if matches!(self.state, State::Idle(..)) {
            self.submit_settings(&[])?;
        }
        Ok(())
    }

    fn drive(&mut self, callbacks: &mut dyn SessionCallbacks) -> Result<(), EngineError> {
        let mut cx = Context::from_waker(noop_waker_ref());
        loop {
            self.report_closed(callbacks)?;

            let mut progressed = self.poll_connection(&mut cx, callbacks)?;
            progressed |= self.poll_request_bodies(&mut cx, callbacks)?;
            progressed |= self.poll_awaiting_responses(&mut cx);
            progressed |= self.poll_response_bodies(&mut cx, callbacks)?;

            if !progressed {
                return self.report_closed(callbacks);
            }
        }
    }

    fn report_closed(&mut self, callbacks: &mut dyn SessionCallbacks) -> Result<(), EngineError> {
        for (stream_id, error_code) in std::mem::take(&mut self.closed) {
            match callbacks.on_stream_close(stream_id, error_code) {
                Ok(()) | Err(CallbackError::Temporal) => {}
                Err(CallbackError::Failure) => return Err(EngineError::CallbackFailure),
            }
        }
        Ok(())
    }

    fn poll_connection(&mut self, cx: &mut Context<'_>, callbacks: &mut dyn SessionCallbacks) -> Result<bool, EngineError> {
        let mut progressed = false;

        if let State::Handshaking(handshake) = &mut self.state {
            match handshake.as_mut().poll(cx) {
                Poll::Ready(Ok(connection)) => {
                    debug!("http2 handshake finished");
                    self.state = State::Serving(connection);
                    progressed = true;
                }
                Poll::Ready(Err(e)) => {
                    self.state = State::Closed;
                    return Err(e.into());
                }
                Poll::Pending => return Ok(false),
            }
        }

        let mut accepted = Vec::new();
        let mut finished = false;
        if let State::Serving(connection) = &mut self.state {
            loop {
                match connection.poll_accept(cx) {
                    Poll::Ready(Some(Ok(pair))) => accepted.push(pair),
                    Poll::Ready(Some(Err(e))) => return Err(e.into()),
                    Poll::Ready(None) => {
                        finished = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if finished {
            debug!("peer finished the http2 connection");
            self.state = State::Closed;
            progressed = true;
        }

        progressed |= !accepted.is_empty();
        for (request, respond) in accepted {
            self.accept(request, respond, callbacks)?;
        }
        Ok(progressed)
    }

    fn accept(
        &mut self,
        request: http::Request<RecvStream>,
        respond: SendResponse<Bytes>,
        callbacks: &mut dyn SessionCallbacks,
    ) -> Result<(), EngineError> {
        let stream_id: StreamId = respond.stream_id().as_u32();
        let (parts, body) = request.into_parts();
        let frame = FrameInfo::request_headers(stream_id, body.is_end_stream());
        debug!(stream_id, method = %parts.method, "accepted request stream");

        let mut io = StreamIo { recv: None, respond: Some(respond), send: None };
        let mut delivered = deliver_headers(&frame, &parts, callbacks)?;
        if delivered {
            if frame.end_stream {
                delivered = stream_ok(callbacks.on_frame_recv(&frame))?;
            } else {
                io.recv = Some(body);
            }
        }

        self.streams.insert(stream_id, io);
        if !delivered {
            self.reset_stream(stream_id, Reason::INTERNAL_ERROR);
        }
        Ok(())
    }

    fn poll_request_bodies(&mut self, cx: &mut Context<'_>, callbacks: &mut dyn SessionCallbacks) -> Result<bool, EngineError> {
        let receiving: Vec<StreamId> = self.streams.iter().filter(|(_, io)| io.recv.is_some()).map(|(id, _)| *id).collect();

        let mut progressed = false;
        for stream_id in receiving {
            match self.poll_request_body(stream_id, cx, callbacks)? {
                BodyPoll::Idle => {}
                BodyPoll::Progressed => progressed = true,
                BodyPoll::Finished => {
                    progressed = true;
                    if let Some(io) = self.streams.get_mut(&stream_id) {
                        io.recv = None;
                    }
                    if !stream_ok(callbacks.on_frame_recv(&FrameInfo::data(stream_id, true)))? {
                        self.reset_stream(stream_id, Reason::INTERNAL_ERROR);
                    }
                }
                BodyPoll::Reset(reason) => {
                    progressed = true;
                    self.reset_stream(stream_id, reason);
                }
                BodyPoll::Gone(error_code) => {
                    progressed = true;
                    self.streams.remove(&stream_id);
                    self.closed.push((stream_id, error_code));
                }
            }
        }
        Ok(progressed)
    }

    fn poll_request_body(
        &mut self,
        stream_id: StreamId,
        cx: &mut Context<'_>,
        callbacks: &mut dyn SessionCallbacks,
    ) -> Result<BodyPoll, EngineError> {
        let Some(recv) = self.streams.get_mut(&stream_id).and_then(|io| io.recv.as_mut()) else {
            return Ok(BodyPoll::Idle);
        };

        let mut progressed = false;
        loop {
            match recv.poll_data(cx) {
                Poll::Ready(Some(Ok(data))) => {
                    progressed = true;
                    if let Err(e) = recv.flow_control().release_capacity(data.len()) {
                        warn!(stream_id, cause = %e, "failed to release receive capacity");
                    }
                    if !stream_ok(callbacks.on_data_chunk_recv(stream_id, &data))? {
                        return Ok(BodyPoll::Reset(Reason::INTERNAL_ERROR));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!(stream_id, cause = %e, "request stream failed");
                    return Ok(BodyPoll::Gone(reason_code(&e)));
                }
                Poll::Ready(None) => return Ok(BodyPoll::Finished),
                Poll::Pending => return Ok(if progressed { BodyPoll::Progressed } else { BodyPoll::Idle }),
            }
        }
    }

    /// Notices peer resets on streams whose handler has not answered yet.
    fn poll_awaiting_responses(&mut self, cx: &mut Context<'_>) -> bool {
        let mut gone = Vec::new();
        for (stream_id, io) in &mut self.streams {
            if io.recv.is_some() || io.send.is_some() {
                continue;
            }
            let Some(respond) = io.respond.as_mut() else {
                continue;
            };
            match respond.poll_reset(cx) {
                Poll::Ready(Ok(reason)) => gone.push((*stream_id, u32::from(reason))),
                Poll::Ready(Err(e)) => gone.push((*stream_id, reason_code(&e))),
                Poll::Pending => {}
            }
        }

        for &(stream_id, error_code) in &gone {
            debug!(stream_id, error_code, "peer reset the stream before it was answered");
            self.streams.remove(&stream_id);
        }
        let progressed = !gone.is_empty();
        self.closed.extend(gone);
        progressed
    }

    fn poll_response_bodies(&mut self, cx: &mut Context<'_>, callbacks: &mut dyn SessionCallbacks) -> Result<bool, EngineError> {
        let sending: Vec<StreamId> = self.streams.iter().filter(|(_, io)| io.send.is_some()).map(|(id, _)| *id).collect();

        let mut progressed = false;
        for stream_id in sending {
            match self.poll_response_body(stream_id, cx, callbacks)? {
                BodyPoll::Idle => {}
                BodyPoll::Progressed => progressed = true,
                BodyPoll::Finished => {
                    progressed = true;
                    self.streams.remove(&stream_id);
                    self.closed.push((stream_id, NO_ERROR));
                }
                BodyPoll::Reset(reason) => {
                    progressed = true;
                    self.reset_stream(stream_id, reason);
                }
                BodyPoll::Gone(error_code) => {
                    progressed = true;
                    self.streams.remove(&stream_id);
                    self.closed.push((stream_id, error_code));
                }
            }
        }
        Ok(progressed)
    }

    fn poll_response_body(
        &mut self,
        stream_id: StreamId,
        cx: &mut Context<'_>,
        callbacks: &mut dyn SessionCallbacks,
    ) -> Result<BodyPoll, EngineError> {
        let Some(send) = self.streams.get_mut(&stream_id).and_then(|io| io.send.as_mut()) else {
            return Ok(BodyPoll::Idle);
        };

        let mut progressed = false;
        loop {
            let idle = if progressed { BodyPoll::Progressed } else { BodyPoll::Idle };

            let mut capacity = send.capacity();
            if capacity == 0 {
                send.reserve_capacity(MAX_CHUNK_SIZE);
                match send.poll_capacity(cx) {
                    Poll::Ready(Some(Ok(available))) if available > 0 => capacity = available,
                    Poll::Ready(Some(Ok(_))) | Poll::Pending => return Ok(idle),
                    Poll::Ready(Some(Err(e))) => return Ok(BodyPoll::Gone(reason_code(&e))),
                    Poll::Ready(None) => return Ok(BodyPoll::Gone(INTERNAL_ERROR)),
                }
            }

            let length = capacity.min(MAX_CHUNK_SIZE);
            let chunk = match callbacks.on_data_source_read(stream_id, length) {
                Ok(chunk) => chunk,
                Err(CallbackError::Temporal) => return Ok(BodyPoll::Reset(Reason::INTERNAL_ERROR)),
                Err(CallbackError::Failure) => return Err(EngineError::CallbackFailure),
            };

            if chunk.data.len() > length {
                error!(stream_id, length, produced = chunk.data.len(), "data source produced more than requested");
                return Err(EngineError::CallbackFailure);
            }

            // nothing available yet, the source is asked again on the next drive
            if chunk.data.is_empty() && !chunk.eof {
                return Ok(idle);
            }

            progressed = true;
            let eof = chunk.eof;
            if let Err(e) = send.send_data(chunk.data, eof) {
                debug!(stream_id, cause = %e, "response stream failed");
                return Ok(BodyPoll::Gone(reason_code(&e)));
            }
            if eof {
                return Ok(BodyPoll::Finished);
            }
        }
    }

    /// Moves whatever the engine wrote into the pipe to `output`.
    fn drain_pipe(&mut self) -> Result<usize, EngineError> {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut drained = 0;
        loop {
            self.output.reserve(OUTPUT_RESERVE);
            match poll_read_buf(Pin::new(&mut self.pipe), &mut cx, &mut self.output) {
                Poll::Ready(Ok(0)) | Poll::Pending => return Ok(drained),
                Poll::Ready(Ok(read)) => drained += read,
                Poll::Ready(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn reset_stream(&mut self, stream_id: StreamId, reason: Reason) {
        warn!(stream_id, ?reason, "reset stream");
        if let Some(mut io) = self.streams.remove(&stream_id) {
            if let Some(send) = io.send.as_mut() {
                send.send_reset(reason);
            } else if let Some(respond) = io.respond.as_mut() {
                respond.send_reset(reason);
            }
        }
        self.closed.push((stream_id, u32::from(reason)));
    }
}

impl Default for H2Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for H2Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle(..) => "idle",
            State::Handshaking(_) => "handshaking",
            State::Serving(_) => "serving",
            State::Closed => "closed",
        };
        f.debug_struct("H2Session").field("state", &state).field("streams", &self.streams.len()).finish()
    }
}

impl Session for H2Session {
    fn submit_settings(&mut self, settings: &[Setting]) -> Result<(), EngineError> {
        let (mut builder, io) = match std::mem::replace(&mut self.state, State::Closed) {
            State::Idle(builder, io) => (builder, io),
            other => {
                self.state = other;
                return Err(EngineError::SettingsSubmitted);
            }
        };

        for setting in settings {
            match *setting {
                Setting::MaxConcurrentStreams(max) => {
                    builder.max_concurrent_streams(max);
                }
                Setting::InitialWindowSize(size) => {
                    if size > MAX_WINDOW_SIZE {
                        return Err(EngineError::invalid_setting(format!("initial window size {size} is too large")));
                    }
                    builder.initial_window_size(size);
                }
                Setting::MaxFrameSize(size) => {
                    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&size) {
                        return Err(EngineError::invalid_setting(format!("max frame size {size} is out of range")));
                    }
                    builder.max_frame_size(size);
                }
                Setting::EnablePush(enabled) => {
                    if enabled {
                        warn!("server push is not supported, advertising it disabled");
                    }
                }
            }
        }

        self.state = State::Handshaking(Box::pin(builder.handshake(io)));
        Ok(())
    }

    fn mem_recv(&mut self, data: &[u8], callbacks: &mut dyn SessionCallbacks) -> Result<usize, EngineError> {
        self.ensure_started()?;

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut consumed = 0;
        let mut stalled = false;
        while consumed < data.len() {
            match Pin::new(&mut self.pipe).poll_write(&mut cx, &data[consumed..]) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(written)) => {
                    consumed += written;
                    stalled = false;
                }
                Poll::Ready(Err(e)) => return Err(e.into()),
                // the pipe is full: move pending output aside so the engine can write,
                // then let it consume what it holds
                Poll::Pending if !stalled => {
                    stalled = true;
                    self.drain_pipe()?;
                    self.drive(callbacks)?;
                }
                Poll::Pending => break,
            }
        }

        self.drive(callbacks)?;
        if consumed < data.len() {
            debug!(consumed, submitted = data.len(), "engine is applying backpressure");
        }
        Ok(consumed)
    }

    fn mem_send(&mut self, callbacks: &mut dyn SessionCallbacks) -> Result<&[u8], EngineError> {
        self.ensure_started()?;

        // the view handed out by the previous call has been consumed
        self.output.advance(self.returned);
        self.returned = 0;

        self.drive(callbacks)?;
        while self.output.len() < MAX_OUTPUT && self.drain_pipe()? > 0 {
            self.drive(callbacks)?;
        }

        self.returned = self.output.len();
        Ok(&self.output[..])
    }

    fn submit_response(&mut self, stream_id: StreamId, headers: &[HeaderField<'_>], with_body: bool) -> Result<(), EngineError> {
        let response = build_response(headers)?;

        let io = self.streams.get_mut(&stream_id).ok_or_else(|| EngineError::invalid_stream(stream_id))?;
        let mut respond = io.respond.take().ok_or_else(|| EngineError::invalid_stream(stream_id))?;
        let send = respond.send_response(response, !with_body)?;

        if with_body {
            io.send = Some(send);
        } else {
            self.streams.remove(&stream_id);
            self.closed.push((stream_id, NO_ERROR));
        }
        Ok(())
    }
}

/// Maps a callback result to whether the stream may continue.
fn stream_ok(result: CallbackResult) -> Result<bool, EngineError> {
    match result {
        Ok(()) => Ok(true),
        Err(CallbackError::Temporal) => Ok(false),
        Err(CallbackError::Failure) => Err(EngineError::CallbackFailure),
    }
}

fn reason_code(e: &h2::Error) -> u32 {
    e.reason().map_or(INTERNAL_ERROR, u32::from)
}

fn deliver_headers(frame: &FrameInfo, parts: &http::request::Parts, callbacks: &mut dyn SessionCallbacks) -> Result<bool, EngineError> {
    if !stream_ok(callbacks.on_begin_headers(frame))? {
        return Ok(false);
    }

    let mut pseudo: Vec<(&[u8], &[u8])> = Vec::with_capacity(4);
    pseudo.push((&b":method"[..], parts.method.as_str().as_bytes()));
    if let Some(scheme) = parts.uri.scheme_str() {
        pseudo.push((&b":scheme"[..], scheme.as_bytes()));
    }
    if let Some(authority) = parts.uri.authority() {
        pseudo.push((&b":authority"[..], authority.as_str().as_bytes()));
    }
    let path = parts.uri.path_and_query().map_or("/", |p| p.as_str());
    pseudo.push((&b":path"[..], path.as_bytes()));

    let regular = parts.headers.iter().map(|(name, value)| (name.as_str().as_bytes(), value.as_bytes()));
    for (name, value) in pseudo.into_iter().chain(regular) {
        if !stream_ok(callbacks.on_header(frame, name, value))? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn build_response(headers: &[HeaderField<'_>]) -> Result<Response<()>, EngineError> {
    let mut response = Response::new(());
    let mut status = None;

    for field in headers {
        if field.name == b":status" {
            let code = StatusCode::from_bytes(field.value).map_err(EngineError::invalid_header_block)?;
            status = Some(code);
        } else if field.name.starts_with(b":") {
            return Err(EngineError::invalid_header_block(format!(
                "unexpected pseudo-header {}",
                String::from_utf8_lossy(field.name)
            )));
        } else {
            let name = HeaderName::from_bytes(field.name).map_err(EngineError::invalid_header_block)?;
            let value = HeaderValue::from_bytes(field.value).map_err(EngineError::invalid_header_block)?;
            response.headers_mut().append(name, value);
        }
    }

    *response.status_mut() = status.ok_or_else(|| EngineError::invalid_header_block("missing :status"))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DataChunk;

    struct Silent;

    impl SessionCallbacks for Silent {
        fn on_begin_headers(&mut self, _frame: &FrameInfo) -> CallbackResult {
            Ok(())
        }

        fn on_header(&mut self, _frame: &FrameInfo, _name: &[u8], _value: &[u8]) -> CallbackResult {
            Ok(())
        }

        fn on_data_chunk_recv(&mut self, _stream_id: StreamId, _data: &[u8]) -> CallbackResult {
            Ok(())
        }

        fn on_frame_recv(&mut self, _frame: &FrameInfo) -> CallbackResult {
            Ok(())
        }

        fn on_stream_close(&mut self, _stream_id: StreamId, _error_code: u32) -> CallbackResult {
            Ok(())
        }

        fn on_data_source_read(&mut self, _stream_id: StreamId, _length: usize) -> CallbackResult<DataChunk> {
            Ok(DataChunk::eof())
        }
    }

    #[tokio::test]
    async fn first_output_is_a_settings_frame() {
        let mut session = H2Session::new();
        session.submit_settings(&[Setting::MaxConcurrentStreams(4), Setting::EnablePush(false)]).unwrap();

        let output = session.mem_send(&mut Silent).unwrap();
        assert!(output.len() >= 9);
        // frame header: 24 bit length, then the type, SETTINGS is 0x4
        assert_eq!(output[3], 0x4);
        assert_eq!(&output[5..9], &[0u8; 4]);
    }

    #[tokio::test]
    async fn settings_can_only_be_submitted_once() {
        let mut session = H2Session::new();
        session.submit_settings(&[]).unwrap();
        assert!(matches!(session.submit_settings(&[]), Err(EngineError::SettingsSubmitted)));
    }

    #[test]
    fn out_of_range_frame_size_is_rejected() {
        let mut session = H2Session::new();
        let result = session.submit_settings(&[Setting::MaxFrameSize(1024)]);
        assert!(matches!(result, Err(EngineError::InvalidSetting { .. })));
    }

    #[tokio::test]
    async fn http1_preface_is_a_protocol_error() {
        let mut session = H2Session::new();
        session.submit_settings(&[]).unwrap();

        let result = session.mem_recv(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", &mut Silent);
        assert!(result.is_err());
    }

    #[test]
    fn response_without_status_is_rejected() {
        let headers = [HeaderField::new(b"content-type", b"text/plain")];
        assert!(matches!(build_response(&headers), Err(EngineError::InvalidHeaderBlock { .. })));
    }

    #[test]
    fn response_with_unknown_pseudo_header_is_rejected() {
        let headers = [HeaderField::new(b":status", b"200"), HeaderField::new(b":path", b"/")];
        assert!(matches!(build_response(&headers), Err(EngineError::InvalidHeaderBlock { .. })));
    }

    #[test]
    fn response_headers_keep_duplicates() {
        let headers = [
            HeaderField::new(b":status", b"404"),
            HeaderField::new(b"set-cookie", b"a=1"),
            HeaderField::new(b"set-cookie", b"b=2"),
        ];
        let response = build_response(&headers).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
    }
}
