//! A multiplexed HTTP/2 front end for an embedded management controller
//!
//! This crate serves many concurrent request/response exchanges ("streams") over a
//! single transport connection. Framing, header compression and flow control are
//! delegated to a protocol engine ([`engine`]) that is driven sans-I/O, while the
//! connection ([`connection`]) owns the socket, keeps track of every open stream,
//! hands completed requests to a [`Handler`](handler::Handler) and streams the
//! responses back.
//!
//! # Features
//!
//! - Cleartext HTTP/2 with prior knowledge, one tokio task per connection
//! - Responses completed from any task, at any time, in any order
//! - Buffered or file backed response bodies, pulled by the engine under flow control
//! - JSON responses with entity tags and `304 Not Modified` handling
//! - A single writer per connection, the socket is never written concurrently
//!
//! # Example
//!
//! ```no_run
//! use bmc_http::handler::{make_handler, AsyncResp};
//! use bmc_http::protocol::Request;
//! use bmc_http::server::Server;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler = make_handler(|request: &Request, response: AsyncResp| {
//!         let path = request.path().to_string();
//!         response.with(|res| res.json_value = json!({ "@odata.id": path }));
//!     });
//!
//!     let server = match Server::builder().address("127.0.0.1:8080").handler(handler).build() {
//!         Ok(server) => server,
//!         Err(e) => {
//!             eprintln!("invalid server configuration: {e}");
//!             return;
//!         }
//!     };
//!     server.start().await;
//! }
//! ```
//!
//! Dropping the last clone of the [`AsyncResp`](handler::AsyncResp) sends the
//! response, so the handler above answers as soon as it returns. A handler that
//! needs to wait moves a clone into a spawned task instead.

pub mod connection;
pub mod date;
pub mod engine;
pub mod handler;
pub mod protocol;
pub mod server;

mod utils;
