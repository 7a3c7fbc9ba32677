//! The response value handlers populate and the connection serializes.
//!
//! A [`Response`] is move-only. It is created with its stream, handed to the handler
//! inside an [`AsyncResp`](crate::handler::AsyncResp) and travels back to the
//! connection through the completion handler once [`Response::end`] is called.
//!
//! The body is exactly one of an in-memory buffer or an open file, see
//! [`ResponseBody`]. Switching between the two keeps the status and headers and
//! discards the previous body.

mod body;

pub use body::BodyChunk;
pub use body::BodyWriter;
pub use body::FileBody;
pub use body::ResponseBody;

use std::fmt;
use std::path::Path;

use bytes::BytesMut;
use http::header::{AsHeaderName, IntoHeaderName, CONTENT_LENGTH, ETAG};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

/// Called once with the finished response.
pub type CompleteRequestHandler = Box<dyn FnOnce(&mut Response) + Send>;

/// Reports whether the connection that will carry the response is still open.
pub type IsAliveHelper = Box<dyn Fn() -> bool + Send + Sync>;

pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    /// Rendered into the body when the response is completed, if not null
    pub json_value: Value,
    expected_hash: Option<String>,
    completed: bool,
    complete_request_handler: Option<CompleteRequestHandler>,
    is_alive_helper: Option<IsAliveHelper>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ResponseBody::default(),
            json_value: Value::Null,
            expected_hash: None,
            completed: false,
            complete_request_handler: None,
            is_alive_helper: None,
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("json_value", &self.json_value)
            .field("expected_hash", &self.expected_hash)
            .field("completed", &self.completed)
            .field("has_complete_request_handler", &self.complete_request_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_int(&self) -> u16 {
        self.status.as_u16()
    }

    /// Sets a header, replacing any value already present under the name.
    pub fn add_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn clear_header<K: AsHeaderName>(&mut self, name: K) {
        self.headers.remove(name);
    }

    /// Returns the header value as a string, `None` if absent or not visible ASCII.
    pub fn header_value<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Returns the in-memory body, switching away from a file body if needed.
    pub fn body_mut(&mut self) -> &mut BytesMut {
        if self.body.is_file() {
            debug!("switching response body from file to buffer");
            self.body = ResponseBody::default();
        }
        match &mut self.body {
            ResponseBody::Buffered(buf) => buf,
            ResponseBody::File(_) => unreachable!("body was switched to a buffer"),
        }
    }

    pub fn write(&mut self, body_part: &[u8]) {
        self.body_mut().extend_from_slice(body_part);
    }

    /// Serves the file at `path` as the body. Returns false if it can not be opened,
    /// in which case the response is left untouched.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> bool {
        match FileBody::open(path.as_ref()) {
            Ok(file) => {
                self.body = ResponseBody::File(file);
                true
            }
            Err(e) => {
                debug!(path = %path.as_ref().display(), cause = %e, "failed to open response file");
                false
            }
        }
    }

    /// Size of the live body, `None` for a file whose size is unknown.
    pub fn payload_size(&self) -> Option<u64> {
        self.body.size()
    }

    /// Sets `Content-Length` from the body. Statuses that must not carry a body
    /// (1xx, 204 and 304) get their body dropped and no `Content-Length`.
    pub fn prepare_payload(&mut self) {
        let bodyless = self.status.is_informational() || self.status == StatusCode::NO_CONTENT || self.status == StatusCode::NOT_MODIFIED;
        if bodyless {
            if self.payload_size().is_some_and(|size| size > 0) {
                error!(status = self.status_int(), "response content provided but the status does not allow a body");
            }
            self.body = ResponseBody::default();
            self.headers.remove(CONTENT_LENGTH);
            return;
        }

        match self.payload_size() {
            Some(size) => {
                self.headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
            }
            None => {
                self.headers.remove(CONTENT_LENGTH);
            }
        }
    }

    /// Completes the response and runs the completion handler, at most once per arming.
    pub fn end(&mut self) {
        if let Some(etag) = self.compute_etag() {
            self.set_etag(&etag);
        }
        if self.completed {
            error!("response was ended twice");
            return;
        }
        self.completed = true;
        if let Some(handler) = self.complete_request_handler.take() {
            debug!("calling completion handler");
            handler(self);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Installs the completion handler and re-arms the response.
    pub fn set_complete_request_handler<F>(&mut self, handler: F)
    where
        F: FnOnce(&mut Response) + Send + 'static,
    {
        self.complete_request_handler = Some(Box::new(handler));
        self.completed = false;
    }

    /// Takes the completion handler out, the response counts as completed afterwards.
    pub fn release_complete_request_handler(&mut self) -> Option<CompleteRequestHandler> {
        self.completed = true;
        self.complete_request_handler.take()
    }

    pub fn set_is_alive_helper<F>(&mut self, helper: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.is_alive_helper = Some(Box::new(helper));
    }

    pub fn release_is_alive_helper(&mut self) -> Option<IsAliveHelper> {
        self.is_alive_helper.take()
    }

    /// Returns true if a liveness helper is installed and reports the connection open.
    pub fn is_alive(&self) -> bool {
        self.is_alive_helper.as_ref().is_some_and(|helper| helper())
    }

    pub fn set_expected_hash<S: Into<String>>(&mut self, hash: S) {
        self.expected_hash = Some(hash.into());
    }

    pub fn expected_hash(&self) -> Option<&str> {
        self.expected_hash.as_deref()
    }

    /// Computes the entity tag of the JSON value.
    ///
    /// Only a 200 response with a non-empty JSON value has one. The tag is the
    /// first four bytes of the SHA-256 digest of the serialized JSON, as quoted
    /// upper-case hex.
    pub fn compute_etag(&self) -> Option<String> {
        if self.status != StatusCode::OK || json_is_empty(&self.json_value) {
            return None;
        }
        let serialized = serde_json::to_vec(&self.json_value).ok()?;
        let digest = Sha256::digest(&serialized);
        Some(format!("\"{}\"", hex::encode_upper(&digest[..4])))
    }

    /// Sets the `ETag` header and turns the response into a 304 when the client
    /// already holds the same representation.
    pub fn set_hash_and_handle_not_modified(&mut self) {
        let Some(etag) = self.compute_etag() else {
            return;
        };
        self.set_etag(&etag);
        if self.expected_hash.as_deref() == Some(etag.as_str()) {
            debug!(etag = %etag, "representation not modified");
            self.json_value = Value::Null;
            self.status = StatusCode::NOT_MODIFIED;
        }
    }

    /// Resets the body, the JSON value, the completion state and the expected hash.
    pub fn clear(&mut self) {
        debug!("clearing response containers");
        self.body = ResponseBody::default();
        self.json_value = Value::Null;
        self.completed = false;
        self.expected_hash = None;
    }

    /// Moves the body out, leaving an empty buffer.
    pub(crate) fn take_body(&mut self) -> ResponseBody {
        std::mem::take(&mut self.body)
    }

    fn set_etag(&mut self, etag: &str) {
        match HeaderValue::from_str(etag) {
            Ok(value) => {
                self.headers.insert(ETAG, value);
            }
            Err(e) => error!(cause = %e, "computed an invalid etag"),
        }
    }
}

fn json_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
