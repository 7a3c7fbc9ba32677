use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures::channel::mpsc::{self, UnboundedReceiver};
use futures::future::{BoxFuture, OptionFuture};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tracing::{debug, error, info, warn};

use super::adapter::{CallbackAdapter, Completion};
use super::complete_response::complete_response_fields;
use super::Http2Settings;
use crate::engine::{EngineError, H2Session, HeaderField, Session, StreamId};
use crate::handler::Handler;
use crate::protocol::{HttpError, ProtocolError, Response, SendError};
use crate::utils::ensure;

/// Size of the buffer each read lands in.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// What an in-flight write hands back when it finishes.
struct WriteOutcome<W> {
    writer: W,
    sent: usize,
    result: io::Result<()>,
}

/// A server side HTTP/2 connection multiplexing many exchanges over one transport.
///
/// `Http2Connection` feeds what it reads into the protocol [`Session`], dispatches
/// every completed request to the handler and writes whatever the session has
/// to send. All of it runs on the task that drives [`process`](Self::process):
/// reads, writes and response completions are multiplexed with `select!`, so the
/// stream table is never shared.
///
/// At most one write is in flight at any time. The writer half is moved into
/// the write future and comes back with its outcome.
///
/// Input the session could not take yet is kept and fed again before anything
/// more is read from the transport.
///
/// # Type Parameters
///
/// * `R`: The async readable half of the transport
/// * `W`: The async writable half of the transport
/// * `H`: The request handler
/// * `S`: The protocol engine, [`H2Session`] unless scripted
pub struct Http2Connection<R, W, H, S = H2Session> {
    reader: R,
    writer: Option<W>,
    in_flight: Option<BoxFuture<'static, WriteOutcome<W>>>,
    in_buffer: Box<[u8]>,
    pending_input: BytesMut,
    session: S,
    adapter: CallbackAdapter<H>,
    completions: UnboundedReceiver<Completion>,
    alive: Arc<AtomicBool>,
    settings: Http2Settings,
}

impl<R, W, H> Http2Connection<R, W, H, H2Session>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    H: Handler,
{
    pub fn new(reader: R, writer: W, handler: Arc<H>) -> Self {
        Self::with_session(reader, writer, handler, H2Session::new())
    }
}

impl<R, W, H, S> Http2Connection<R, W, H, S>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    H: Handler,
    S: Session,
{
    pub fn with_session(reader: R, writer: W, handler: Arc<H>, session: S) -> Self {
        let (completion_tx, completions) = mpsc::unbounded();
        let alive = Arc::new(AtomicBool::new(true));
        Self {
            reader,
            writer: Some(writer),
            in_flight: None,
            in_buffer: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            pending_input: BytesMut::new(),
            session,
            adapter: CallbackAdapter::new(handler, completion_tx, Arc::clone(&alive)),
            completions,
            alive,
            settings: Http2Settings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Http2Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Serves the connection until the peer closes it or an error ends it.
    ///
    /// Responses still owned by handlers when this returns report the
    /// connection as no longer alive and are dropped on completion.
    pub async fn process(mut self) -> Result<(), HttpError> {
        // the session polls its in-memory pipe with a no-op waker, which must not
        // run into the cooperative budget
        let result = tokio::task::unconstrained(self.run()).await;
        self.alive.store(false, Ordering::Release);
        debug!(open_streams = self.adapter.stream_count(), "connection finished");
        result
    }

    async fn run(&mut self) -> Result<(), HttpError> {
        self.start()?;
        self.write_buffer()?;

        loop {
            select! {
                // finished responses go out before more input is taken in
                biased;

                Some((stream_id, response)) = self.completions.next() => {
                    self.send_response(stream_id, response)?;
                }

                Some(outcome) = OptionFuture::from(self.in_flight.as_mut()), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.after_write(outcome)?;
                }

                read = self.reader.read(&mut self.in_buffer), if self.pending_input.is_empty() => {
                    match read {
                        Ok(0) => {
                            info!("peer closed the connection");
                            return Ok(());
                        }
                        Ok(size) => self.after_read(size)?,
                        Err(e) => {
                            error!(cause = %e, "failed to read from connection");
                            return Err(e.into());
                        }
                    }
                }
            }

            let stalled = self.feed_input()?;
            self.write_buffer()?;
            if let Some(submitted) = stalled {
                // nothing is being written that could make room in the session
                ensure!(self.in_flight.is_some(), ProtocolError::ReceiveMismatch { consumed: 0, submitted }.into());
            }
        }
    }

    fn start(&mut self) -> Result<(), HttpError> {
        self.session.submit_settings(&self.settings.to_settings())?;
        debug!(settings = ?self.settings, "submitted settings");
        Ok(())
    }

    fn after_read(&mut self, size: usize) -> Result<(), HttpError> {
        let received = &self.in_buffer[..size];
        let consumed = self.session.mem_recv(received, &mut self.adapter).map_err(|e| engine_failure(&mut self.adapter, e))?;
        ensure!(consumed <= size, ProtocolError::ReceiveMismatch { consumed, submitted: size }.into());
        if consumed < size {
            debug!(consumed, submitted = size, "keeping input the session could not take yet");
            self.pending_input.extend_from_slice(&self.in_buffer[consumed..size]);
        }
        Ok(())
    }

    /// Feeds kept input to the session until it is gone or the session stops taking it.
    ///
    /// Returns the number of bytes still waiting, if any.
    fn feed_input(&mut self) -> Result<Option<usize>, HttpError> {
        while !self.pending_input.is_empty() {
            let submitted = self.pending_input.len();
            let consumed =
                self.session.mem_recv(&self.pending_input, &mut self.adapter).map_err(|e| engine_failure(&mut self.adapter, e))?;
            ensure!(consumed <= submitted, ProtocolError::ReceiveMismatch { consumed, submitted }.into());
            if consumed == 0 {
                return Ok(Some(submitted));
            }
            self.pending_input.advance(consumed);
        }
        Ok(None)
    }

    fn send_response(&mut self, stream_id: StreamId, mut response: Response) -> Result<(), HttpError> {
        let Some(stream) = self.adapter.stream_mut(stream_id) else {
            debug!(stream_id, "stream is gone, dropping response");
            return Ok(());
        };
        if stream.responded {
            warn!(stream_id, "response was already submitted");
            return Ok(());
        }
        stream.responded = true;

        complete_response_fields(&stream.request, &mut response);

        let with_body = response.payload_size() != Some(0);
        if with_body {
            stream.writer = Some(response.take_body().into_writer());
        }

        let status = response.status();
        let mut headers = Vec::with_capacity(response.headers().len() + 1);
        headers.push(HeaderField::new(b":status", status.as_str().as_bytes()));
        headers.extend(
            response.headers().iter().map(|(name, value)| HeaderField::new(name.as_str().as_bytes(), value.as_bytes())),
        );

        self.session.submit_response(stream_id, &headers, with_body).map_err(|e| engine_failure(&mut self.adapter, e))?;
        debug!(stream_id, status = status.as_u16(), with_body, "submitted response");
        Ok(())
    }

    fn write_buffer(&mut self) -> Result<(), HttpError> {
        if self.in_flight.is_some() || self.writer.is_none() {
            return Ok(());
        }

        let pending = self.session.mem_send(&mut self.adapter).map_err(|e| engine_failure(&mut self.adapter, e))?;
        if pending.is_empty() {
            return Ok(());
        }
        // the session's view is only valid until the next call into it
        let data = Bytes::copy_from_slice(pending);

        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        self.in_flight = Some(Box::pin(async move {
            let sent = data.len();
            let result = match writer.write_all(&data).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            WriteOutcome { writer, sent, result }
        }));
        Ok(())
    }

    fn after_write(&mut self, outcome: WriteOutcome<W>) -> Result<(), HttpError> {
        self.writer = Some(outcome.writer);
        match outcome.result {
            Ok(()) => {
                debug!(sent = outcome.sent, "wrote to connection");
                Ok(())
            }
            Err(e) => {
                error!(cause = %e, "failed to write to connection");
                Err(SendError::io(e).into())
            }
        }
    }
}

impl<R, W, H: Handler, S: fmt::Debug> fmt::Debug for Http2Connection<R, W, H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2Connection")
            .field("session", &self.session)
            .field("open_streams", &self.adapter.stream_count())
            .field("pending_input", &self.pending_input.len())
            .field("writing", &self.in_flight.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Prefers the violation a callback recorded over the engine's view of it.
fn engine_failure<H: Handler>(adapter: &mut CallbackAdapter<H>, e: EngineError) -> HttpError {
    match adapter.take_close_reason() {
        Some(reason) => reason.into(),
        None => {
            error!(cause = %e, "protocol engine failed");
            e.into()
        }
    }
}
