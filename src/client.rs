//! outbound socket factory.

use std::sync::Arc;
use std::time::Duration;

use crate::handler::Handler;
use crate::handshake::WsRequestContext;
use crate::socket::{Socket, SocketCore, SocketKind};
#[cfg(feature = "tls")]
use crate::tls::TlsConfig;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// builds sockets that all share a handler and, optionally, a TLS configuration.
pub struct Client {
    handler: Arc<dyn Handler + Send + Sync>,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<TlsConfig>>,
    connect_timeout: Duration,
}

impl Client {
    pub fn new(handler: Arc<dyn Handler + Send + Sync>) -> Self {
        Self {
            handler,
            #[cfg(feature = "tls")]
            tls_config: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: TlsConfig) -> Self {
        self.tls_config = Some(Arc::new(config));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// construct a not-yet-connected socket of the given transport kind.
    /// call [`crate::socket::SocketCore::connect`] on the result to dial.
    pub fn create_socket(&self, kind: SocketKind) -> Socket {
        self.create_ws_socket(kind, WsRequestContext::default())
    }

    /// construct a not-yet-connected WS/WSS socket with a specific request
    /// path, extra headers, or credentials for the Upgrade handshake.
    pub fn create_ws_socket(&self, kind: SocketKind, ws_request: WsRequestContext) -> Socket {
        SocketCore::new(
            kind,
            Arc::downgrade(&self.handler),
            self.connect_timeout,
            None,
            Some(ws_request),
            #[cfg(feature = "tls")]
            self.tls_config.clone(),
        )
    }

    /// construct a socket bound to a specific outgoing network interface
    /// (Linux only); the bind happens before `connect()` dials.
    #[cfg(target_os = "linux")]
    pub fn create_socket_on_device(&self, kind: SocketKind, ifname: impl Into<String>) -> Socket {
        SocketCore::new(
            kind,
            Arc::downgrade(&self.handler),
            self.connect_timeout,
            Some(ifname.into()),
            Some(WsRequestContext::default()),
            #[cfg(feature = "tls")]
            self.tls_config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::socket::Socket as SocketHandle;

    struct NoopHandler;
    impl Handler for NoopHandler {
        fn on_connect(&self, _socket: SocketHandle) {}
        fn on_disconnect(&self, _socket: SocketHandle, _error: Error) {}
    }

    #[test]
    fn create_socket_starts_disconnected() {
        let client = Client::new(Arc::new(NoopHandler));
        let socket = client.create_socket(SocketKind::Tcp);
        assert_eq!(socket.state(), crate::socket::SocketState::Disconnected);
    }
}
