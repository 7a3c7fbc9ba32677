//! Listener and accept loop.
//!
//! The server speaks cleartext HTTP/2 with prior knowledge. Transport security is
//! terminated in front of it.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::connection::{Http2Connection, Http2Settings};
use crate::handler::Handler;

pub struct ServerBuilder<H> {
    handler: Option<Arc<H>>,
    address: Option<io::Result<Vec<SocketAddr>>>,
    settings: Http2Settings,
}

impl<H: Handler + 'static> ServerBuilder<H> {
    fn new() -> Self {
        Self { handler: None, address: None, settings: Http2Settings::default() }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn settings(mut self, settings: Http2Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Server<H>, ServerBuildError> {
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)??;
        Ok(Server { handler, address, settings: self.settings })
    }
}

pub struct Server<H> {
    handler: Arc<H>,
    address: Vec<SocketAddr>,
    settings: Http2Settings,
}

impl<H> fmt::Debug for ServerBuilder<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("has_handler", &self.handler.is_some())
            .field("address", &self.address)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<H> fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("address", &self.address).field("settings", &self.settings).finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("handler must be set")]
    MissingHandler,

    #[error("address must be set")]
    MissingAddress,

    #[error("invalid address: {source}")]
    InvalidAddress {
        #[from]
        source: io::Error,
    },
}

impl<H: Handler + 'static> Server<H> {
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder::new()
    }

    /// Installs the log subscriber, binds the configured address and serves
    /// connections until the process ends.
    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            warn!(cause = %e, "log subscriber was already set");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        self.serve(tcp_listener).await;
    }

    /// Accepts connections on `tcp_listener`, one task per connection.
    pub async fn serve(self, tcp_listener: TcpListener) {
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            if let Err(e) = tcp_stream.set_nodelay(true) {
                warn!(cause = %e, "failed to disable nagle");
            }

            let handler = Arc::clone(&self.handler);
            let settings = self.settings;

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = Http2Connection::new(reader, writer, handler).with_settings(settings);
                match connection.process().await {
                    Ok(()) => {
                        info!(%remote_addr, "finished process, connection shutdown");
                    }
                    Err(e) => {
                        error!(%remote_addr, cause = %e, "service has error, connection shutdown");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{make_handler, AsyncResp, HandlerFn};
    use crate::protocol::Request;

    fn noop(_request: &Request, _response: AsyncResp) {}

    #[test]
    fn build_requires_a_handler() {
        let result = Server::<HandlerFn<fn(&Request, AsyncResp)>>::builder().address("127.0.0.1:0").build();
        assert!(matches!(result, Err(ServerBuildError::MissingHandler)));
    }

    #[test]
    fn build_requires_an_address() {
        let result = Server::builder().handler(make_handler(noop as fn(&Request, AsyncResp))).build();
        assert!(matches!(result, Err(ServerBuildError::MissingAddress)));
    }

    #[test]
    fn build_rejects_unresolvable_address() {
        let result = Server::builder().handler(make_handler(noop as fn(&Request, AsyncResp))).address("not an address").build();
        assert!(matches!(result, Err(ServerBuildError::InvalidAddress { .. })));
    }

    #[test]
    fn build_keeps_the_settings() {
        let settings = Http2Settings::default().max_concurrent_streams(8);
        let server = Server::builder()
            .handler(make_handler(noop as fn(&Request, AsyncResp)))
            .address("127.0.0.1:0")
            .settings(settings)
            .build()
            .unwrap();
        assert_eq!(server.settings, settings);
        assert_eq!(server.address.len(), 1);
        assert!(format!("{server:?}").contains("127.0.0.1"));
    }
}
