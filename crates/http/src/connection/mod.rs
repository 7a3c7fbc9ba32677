//! HTTP/2 connection handling.
//!
//! # Components
//!
//! - [`Http2Connection`]: serves one transport connection, it
//!   - feeds received bytes into the protocol engine
//!   - dispatches every completed request to the handler
//!   - serializes completed responses and streams their bodies
//!   - keeps at most one write in flight
//! - [`Http2Settings`]: what the connection advertises in its preface
//!
//! Internally the connection owns a callback adapter that turns engine events into
//! stream table updates. Stream state lives from the first header block of a
//! stream until the engine reports it closed, and is dropped with the connection.

mod adapter;
mod complete_response;
mod http2_connection;
mod settings;
mod stream_table;

pub use http2_connection::Http2Connection;
pub use http2_connection::READ_BUFFER_SIZE;
pub use settings::Http2Settings;
