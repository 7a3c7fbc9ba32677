//! Request and response values plus the protocol level errors.
//!
//! # Components
//!
//! - [`Request`]: the request a handler receives, built from header and data frames
//! - [`Verb`]: the methods the server accepts
//! - [`Response`]: the response a handler populates, with a buffered or file body
//! - [`BodyWriter`]: the pull cursor the protocol engine reads response bodies from
//! - [`HttpError`], [`ProtocolError`], [`SendError`]: what can end a connection
//!
//! Values defined here carry no protocol state. Streams, flow control and framing
//! live in the [`connection`](crate::connection) and [`engine`](crate::engine)
//! modules.

mod verb;
pub use verb::Verb;

mod request;
pub use request::Request;

pub mod response;
pub use response::BodyChunk;
pub use response::BodyWriter;
pub use response::Response;
pub use response::ResponseBody;

mod error;
pub use error::HttpError;
pub use error::ProtocolError;
pub use error::SendError;
