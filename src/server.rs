//! inbound listener: accepts connections and hands each one a [`crate::socket::Socket`].

use std::sync::Arc;

use tokio::net::TcpListener;
#[cfg(feature = "tls")]
use tokio_openssl::SslStream;

use crate::addr::Address;
use crate::auth::{AuthContext, AuthorizationContext};
use crate::error::Error;
use crate::handler::Handler;
use crate::handshake;
use crate::reactor::Reactor;
use crate::socket::{SocketCore, SocketKind};
use crate::stream::{Role, Stream, WsByteStream};
#[cfg(feature = "tls")]
use crate::tls::TlsConfig;

/// listens for inbound connections of one transport kind and spawns a
/// [`crate::socket::Socket`] for each accepted peer.
pub struct Server {
    handler: Arc<dyn Handler + Send + Sync>,
    kind: SocketKind,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<TlsConfig>>,
    auth: AuthContext,
    credentials: Option<AuthorizationContext>,
}

impl Server {
    pub fn new(handler: Arc<dyn Handler + Send + Sync>, kind: SocketKind) -> Self {
        Self {
            handler,
            kind,
            #[cfg(feature = "tls")]
            tls_config: None,
            auth: AuthContext::None,
            credentials: None,
        }
    }

    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: TlsConfig) -> Self {
        self.tls_config = Some(Arc::new(config));
        self
    }

    /// require HTTP Basic or Digest auth on the WS/WSS Upgrade handshake.
    pub fn with_auth(mut self, ctx: AuthContext, credentials: AuthorizationContext) -> Self {
        self.auth = ctx;
        self.credentials = Some(credentials);
        self
    }

    /// bind and spawn the accept loop on the shared reactor; returns the
    /// bound local address once listening (useful when `port` is 0).
    pub async fn start(self: Arc<Self>, host: &str, port: u16) -> Result<std::net::SocketAddr, Error> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        Reactor::shared().handle().spawn(async move {
            self.accept_loop(listener).await;
        });
        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (tcp, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept() failed, stopping listener");
                    return;
                }
            };
            tcp.set_nodelay(true).ok();
            let peer = Address::from_ip(peer_addr.ip(), peer_addr.port());
            let this = self.clone();
            Reactor::shared().handle().spawn(async move {
                this.handle_accepted(tcp, peer).await;
            });
        }
    }

    async fn handle_accepted(&self, tcp: tokio::net::TcpStream, peer: Address) {
        let stream = match self.build_stream(tcp).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, %peer, "inbound handshake failed");
                return;
            }
        };
        SocketCore::from_accepted(self.kind, Arc::downgrade(&self.handler), peer, stream);
    }

    async fn build_stream(&self, tcp: tokio::net::TcpStream) -> Result<Stream, Error> {
        match self.kind {
            SocketKind::Tcp => Ok(Stream::Tcp(tcp)),
            #[cfg(feature = "tls")]
            SocketKind::Tls => {
                let config = self
                    .tls_config
                    .as_ref()
                    .ok_or_else(|| Error::new(crate::error::ErrorKind::Invalid))?;
                let acceptor = config.build_acceptor()?;
                let ssl = openssl::ssl::Ssl::new(acceptor.context())?;
                let mut tls = SslStream::new(ssl, tcp)?;
                std::pin::Pin::new(&mut tls).accept().await?;
                Ok(Stream::Tls(tls))
            }
            SocketKind::Ws => {
                let mut tcp = tcp;
                handshake::server_handshake(&mut tcp, &self.auth, self.credentials.as_ref())
                    .await
                    .map_err(Error::from)?;
                Ok(Stream::Ws(WsByteStream::new(tcp, Role::Server)))
            }
            #[cfg(feature = "tls")]
            SocketKind::Wss => {
                let config = self
                    .tls_config
                    .as_ref()
                    .ok_or_else(|| Error::new(crate::error::ErrorKind::Invalid))?;
                let acceptor = config.build_acceptor()?;
                let ssl = openssl::ssl::Ssl::new(acceptor.context())?;
                let mut tls = SslStream::new(ssl, tcp)?;
                std::pin::Pin::new(&mut tls).accept().await?;
                handshake::server_handshake(&mut tls, &self.auth, self.credentials.as_ref())
                    .await
                    .map_err(Error::from)?;
                Ok(Stream::Wss(WsByteStream::new(tls, Role::Server)))
            }
        }
    }
}
