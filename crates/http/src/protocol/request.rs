//! Request value built incrementally while header and data frames arrive.
//!
//! A [`Request`] is owned by its stream until dispatch. Handlers only ever see it
//! through a shared reference, once every header and body byte has been received.

use bytes::{Bytes, BytesMut};
use http::header::{AsHeaderName, HeaderMap};
use http::{HeaderName, HeaderValue, Uri};

use super::Verb;

#[derive(Debug, Default)]
pub struct Request {
    method: Option<Verb>,
    target: Option<Uri>,
    headers: HeaderMap,
    body: BytesMut,
    is_secure: bool,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the request method, `None` until `:method` has been received.
    pub fn method(&self) -> Option<Verb> {
        self.method
    }

    /// Returns the request target, `None` until `:path` has been received.
    pub fn target(&self) -> Option<&Uri> {
        self.target.as_ref()
    }

    /// Returns the path component of the target, `"/"` when no target is known.
    pub fn path(&self) -> &str {
        self.target.as_ref().map_or("/", Uri::path)
    }

    /// Returns the request headers in arrival order, duplicates included.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of the header as a string.
    ///
    /// Values that are not visible ASCII are treated as absent.
    pub fn header_value<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Copies the body into an owned [`Bytes`] that can outlive the request.
    pub fn body_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub(crate) fn has_method(&self) -> bool {
        self.method.is_some()
    }

    pub(crate) fn has_target(&self) -> bool {
        self.target.is_some()
    }

    pub(crate) fn set_method(&mut self, verb: Verb) {
        self.method = Some(verb);
    }

    pub(crate) fn set_target(&mut self, target: Uri) {
        self.target = Some(target);
    }

    pub(crate) fn set_secure(&mut self, is_secure: bool) {
        self.is_secure = is_secure;
    }

    pub(crate) fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub(crate) fn extend_body(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }
}
