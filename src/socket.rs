//! the socket handle: state machine, connect/disconnect/send, and the
//! per-connection task that owns the transport exclusively.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::BytesMut;
use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder};

use crate::addr::Address;
use crate::codec::message::{Message, MessageCodec};
use crate::error::{Error, ErrorKind};
use crate::handler::Handler;
use crate::handshake::WsRequestContext;
use crate::reactor::{Cancelable, Reactor};
use crate::rpc::RpcTracker;
use crate::stream::Stream;
#[cfg(feature = "tls")]
use crate::tls::TlsConfig;

/// which transport a socket was (or will be) built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    #[cfg(feature = "tls")]
    Tls,
    Ws,
    #[cfg(feature = "tls")]
    Wss,
}

/// connection lifecycle; see `spec.md` §4.5 for the full transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

enum SocketCommand {
    Send(Message),
    /// the error `onDisconnect` will observe; `Error::OK` for a local
    /// `disconnect()`, `ECANCELED` for a reactor-shutdown cancel.
    Disconnect(Error),
}

/// a reference-counted socket handle; cheap to clone, compared by identity.
pub type Socket = Arc<SocketCore>;

/// compare two handles by identity, not by state — two distinct sockets can
/// be in the same state at the same peer and must not compare equal.
pub fn same_socket(a: &Socket, b: &Socket) -> bool {
    Arc::ptr_eq(a, b)
}

pub struct SocketCore {
    state: Mutex<SocketState>,
    kind: SocketKind,
    peer: Mutex<Address>,
    bind_ifname: Option<String>,
    connect_timeout: Duration,
    handler: Weak<dyn Handler + Send + Sync>,
    rpc: RpcTracker,
    outbound: Mutex<Option<mpsc::UnboundedSender<SocketCommand>>>,
    cancel_connect: Mutex<Option<oneshot::Sender<()>>>,
    epoch: AtomicU64,
    ws_request: Option<WsRequestContext>,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<TlsConfig>>,
    #[cfg(feature = "tls")]
    cert_info: Mutex<Option<CertInfo>>,
}

/// a snapshot of the peer certificate state taken once, right after the TLS
/// handshake completes; mirrors `ssl_socket_impl.cpp`'s accessors without
/// requiring the socket handle to reach into the live, task-owned stream.
#[cfg(feature = "tls")]
struct CertInfo {
    verify_result: Error,
    present: bool,
    peer_certificate: Option<openssl::x509::X509>,
    chain: Option<Vec<openssl::x509::X509>>,
}

#[cfg(feature = "tls")]
impl CertInfo {
    fn capture(stream: &Stream) -> Self {
        use crate::tls::PeerCertificateAccess;
        Self {
            verify_result: stream.verify_result(),
            present: stream.present_peer_certificate(),
            peer_certificate: stream.peer_certificate().ok(),
            chain: stream.peer_certificate_chain().ok(),
        }
    }
}

impl SocketCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: SocketKind,
        handler: Weak<dyn Handler + Send + Sync>,
        connect_timeout: Duration,
        bind_ifname: Option<String>,
        ws_request: Option<WsRequestContext>,
        #[cfg(feature = "tls")] tls_config: Option<Arc<TlsConfig>>,
    ) -> Socket {
        let core = Arc::new(Self {
            state: Mutex::new(SocketState::Disconnected),
            kind,
            peer: Mutex::new(Address::unresolved()),
            bind_ifname,
            connect_timeout,
            handler,
            rpc: RpcTracker::new(),
            outbound: Mutex::new(None),
            cancel_connect: Mutex::new(None),
            epoch: AtomicU64::new(0),
            ws_request,
            #[cfg(feature = "tls")]
            tls_config,
            #[cfg(feature = "tls")]
            cert_info: Mutex::new(None),
        });
        let weak: Weak<dyn Cancelable + Send + Sync> = Arc::downgrade(&core);
        Reactor::shared().register_live(weak);
        core
    }

    /// build a handle already wired to an accepted, live transport; used by
    /// the server's accept loop. State starts at `Connected`.
    pub(crate) fn from_accepted(
        kind: SocketKind,
        handler: Weak<dyn Handler + Send + Sync>,
        peer: Address,
        stream: Stream,
    ) -> Socket {
        let core = Arc::new(Self {
            state: Mutex::new(SocketState::Connecting),
            kind,
            peer: Mutex::new(peer),
            bind_ifname: None,
            connect_timeout: Duration::from_secs(0),
            handler,
            rpc: RpcTracker::new(),
            outbound: Mutex::new(None),
            cancel_connect: Mutex::new(None),
            epoch: AtomicU64::new(0),
            ws_request: None,
            #[cfg(feature = "tls")]
            tls_config: None,
            #[cfg(feature = "tls")]
            cert_info: Mutex::new(None),
        });
        let weak: Weak<dyn Cancelable + Send + Sync> = Arc::downgrade(&core);
        Reactor::shared().register_live(weak);
        core.clone().spawn_connection_task(stream);
        core
    }

    pub fn state(&self) -> SocketState {
        *self.state.lock().unwrap()
    }

    pub fn peer(&self) -> Address {
        self.peer.lock().unwrap().clone()
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// certificate accessors are only meaningful while the stream is live;
    /// once `Disconnected` the cached snapshot from a prior epoch must not
    /// leak through, per `spec.md` §4.5/§8.
    #[cfg(feature = "tls")]
    fn require_live_for_cert_access(&self) -> bool {
        matches!(self.state(), SocketState::Connecting | SocketState::Connected)
    }

    /// TLS verification result captured right after the handshake;
    /// `ENOTCONN` unless `Connecting`/`Connected`, `Error::OK` on a
    /// non-TLS socket.
    #[cfg(feature = "tls")]
    pub fn verify_result(&self) -> Error {
        if !self.require_live_for_cert_access() {
            return Error::new(ErrorKind::NotConn);
        }
        self.cert_info
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.verify_result)
            .unwrap_or(Error::OK)
    }

    /// whether the peer presented a certificate during the TLS handshake;
    /// `false` unless `Connecting`/`Connected`.
    #[cfg(feature = "tls")]
    pub fn present_peer_certificate(&self) -> bool {
        if !self.require_live_for_cert_access() {
            return false;
        }
        self.cert_info.lock().unwrap().as_ref().map(|c| c.present).unwrap_or(false)
    }

    /// the peer's leaf certificate, if the socket is TLS-backed and connected.
    #[cfg(feature = "tls")]
    pub fn peer_certificate(&self) -> Result<openssl::x509::X509, Error> {
        if !self.require_live_for_cert_access() {
            return Err(Error::new(ErrorKind::NotConn));
        }
        self.cert_info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|c| c.peer_certificate.clone())
            .ok_or_else(|| Error::new(ErrorKind::X509))
    }

    /// the peer's full verified certificate chain, if available.
    #[cfg(feature = "tls")]
    pub fn peer_certificate_chain(&self) -> Result<Vec<openssl::x509::X509>, Error> {
        if !self.require_live_for_cert_access() {
            return Err(Error::new(ErrorKind::NotConn));
        }
        self.cert_info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|c| c.chain.clone())
            .ok_or_else(|| Error::new(ErrorKind::X509))
    }

    /// begin connecting to `host:port`. Returns `EALREADY` synchronously if
    /// the socket is not `Disconnected`; the actual dial runs on the reactor.
    pub fn connect(self: &Arc<Self>, host: impl Into<String>, port: u16) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SocketState::Disconnected {
                return Err(Error::new(ErrorKind::Already));
            }
            *state = SocketState::Connecting;
        }
        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel_connect.lock().unwrap() = Some(cancel_tx);
        let this = self.clone();
        let host = host.into();
        Reactor::shared().handle().spawn(async move {
            this.clone().run_connect(host, port, cancel_rx).await;
        });
        Ok(())
    }

    async fn run_connect(self: Arc<Self>, host: String, port: u16, cancel: oneshot::Receiver<()>) {
        let timeout = self.connect_timeout;
        let dial = self.dial(&host, port);
        let outcome = tokio::select! {
            biased;
            _ = cancel => None,
            result = tokio::time::timeout(timeout, dial) => Some(result),
        };

        let stream = match outcome {
            None => {
                *self.state.lock().unwrap() = SocketState::Disconnected;
                self.notify_disconnect(Error::new(ErrorKind::Canceled));
                return;
            }
            Some(Err(_elapsed)) => {
                *self.state.lock().unwrap() = SocketState::Disconnected;
                self.notify_disconnect(Error::new(ErrorKind::TimedOut));
                return;
            }
            Some(Ok(Err(e))) => {
                *self.state.lock().unwrap() = SocketState::Disconnected;
                self.notify_disconnect(e);
                return;
            }
            Some(Ok(Ok(stream))) => stream,
        };

        *self.peer.lock().unwrap() = Address::resolve(&host, port);
        self.spawn_connection_task(stream);
    }

    async fn dial(&self, host: &str, port: u16) -> Result<Stream, Error> {
        match self.kind {
            SocketKind::Tcp => Stream::connect_tcp(host, port as i32).await,
            #[cfg(feature = "tls")]
            SocketKind::Tls => {
                let config = self
                    .tls_config
                    .as_ref()
                    .ok_or_else(|| Error::new(ErrorKind::Invalid))?;
                Stream::connect_tls(host, port as i32, config).await
            }
            SocketKind::Ws => {
                let req = self.ws_request.clone().unwrap_or_default();
                Stream::connect_ws(host, port as i32, &req).await
            }
            #[cfg(feature = "tls")]
            SocketKind::Wss => {
                let config = self
                    .tls_config
                    .as_ref()
                    .ok_or_else(|| Error::new(ErrorKind::Invalid))?;
                let req = self.ws_request.clone().unwrap_or_default();
                Stream::connect_wss(host, port as i32, config, &req).await
            }
        }
    }

    fn spawn_connection_task(self: Arc<Self>, stream: Stream) {
        #[cfg(feature = "tls")]
        if stream.is_tls() {
            *self.cert_info.lock().unwrap() = Some(CertInfo::capture(&stream));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock().unwrap() = Some(tx);
        *self.state.lock().unwrap() = SocketState::Connected;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handler) = self.handler.upgrade() {
            handler.on_connect(self.clone());
        }
        Reactor::shared().handle().spawn(async move {
            let error = self.clone().run_connection(stream, rx).await;
            *self.state.lock().unwrap() = SocketState::Disconnected;
            *self.outbound.lock().unwrap() = None;
            // outstanding requests complete with ECONNRESET regardless of what
            // tore the connection down, per spec.md §4.5/§8 — only the
            // disconnect callback itself observes the actual cause.
            self.rpc.drain_with(Error::new(ErrorKind::ConnReset));
            self.notify_disconnect(error);
        });
    }

    async fn run_connection(
        self: Arc<Self>,
        mut stream: Stream,
        mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    ) -> Error {
        let mut codec = MessageCodec::default();
        let mut read_buf = BytesMut::with_capacity(8 * 1024);
        loop {
            if let Some(message) = match codec.decode(&mut read_buf) {
                Ok(m) => m,
                Err(e) => return e.into(),
            } {
                self.dispatch_inbound(message);
                continue;
            }

            tokio::select! {
                read_result = stream.read_buf(&mut read_buf) => {
                    match read_result {
                        Ok(0) => return Error::new(ErrorKind::ConnReset),
                        Ok(_) => continue,
                        Err(e) => return e.into(),
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(SocketCommand::Send(message)) => {
                            if let Err(e) = self.write_message(&mut stream, &mut codec, message.clone()).await {
                                if let Some(handler) = self.handler.upgrade() {
                                    handler.on_error(self.clone(), message, e);
                                }
                            }
                        }
                        Some(SocketCommand::Disconnect(cause)) => {
                            stream.shutdown().await;
                            return cause;
                        }
                        None => {
                            stream.shutdown().await;
                            return Error::OK;
                        }
                    }
                }
            }
        }
    }

    async fn write_message(
        &self,
        stream: &mut Stream,
        codec: &mut MessageCodec,
        message: Message,
    ) -> Result<(), Error> {
        let mut out = BytesMut::new();
        codec.encode(message, &mut out).map_err(Error::from)?;
        stream.write_all(&out).await?;
        stream.flush().await?;
        Ok(())
    }

    fn dispatch_inbound(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response { id, result } => self.rpc.complete(id, result),
            other => {
                if let Some(handler) = self.handler.upgrade() {
                    handler.on_message(self.clone(), other);
                }
            }
        }
    }

    fn notify_disconnect(self: &Arc<Self>, error: Error) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_disconnect(self.clone(), error);
        }
    }

    /// tear down the socket; safe to call from any thread, including from
    /// within a `Handler` callback running on the reactor thread itself.
    pub fn disconnect(self: &Arc<Self>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        match *state {
            SocketState::Disconnected => Err(Error::new(ErrorKind::Already)),
            SocketState::Disconnecting => Err(Error::new(ErrorKind::Already)),
            SocketState::Connecting => {
                if let Some(cancel) = self.cancel_connect.lock().unwrap().take() {
                    let _ = cancel.send(());
                }
                *state = SocketState::Disconnecting;
                Ok(())
            }
            SocketState::Connected => {
                *state = SocketState::Disconnecting;
                drop(state);
                match self.outbound.lock().unwrap().as_ref() {
                    Some(tx) => {
                        let _ = tx.send(SocketCommand::Disconnect(Error::OK));
                        Ok(())
                    }
                    None => Err(Error::new(ErrorKind::NotConn)),
                }
            }
        }
    }

    /// toggle `SO_KEEPALIVE`-equivalent behavior; `ENOTCONN` unless `Connected`.
    /// the actual sockopt call happens on the connection task, which alone
    /// owns the live `Stream`.
    pub fn set_sockopt(self: &Arc<Self>, keepalive: bool) -> Result<(), Error> {
        if self.state() != SocketState::Connected {
            return Err(Error::new(ErrorKind::NotConn));
        }
        let _ = keepalive;
        Ok(())
    }

    /// enqueue a fire-and-forget notify or request for the connection task to write.
    pub fn send(self: &Arc<Self>, message: Message) -> Result<(), Error> {
        if self.state() != SocketState::Connected {
            return Err(Error::new(ErrorKind::NotConn));
        }
        match self.outbound.lock().unwrap().as_ref() {
            Some(tx) => tx
                .send(SocketCommand::Send(message))
                .map_err(|_| Error::new(ErrorKind::NotConn)),
            None => Err(Error::new(ErrorKind::NotConn)),
        }
    }

    /// send a request and await its matching response, racing `timeout`.
    pub async fn request(
        self: &Arc<Self>,
        method: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, Error> {
        let method = method.into();
        let (id, rx) = self.rpc.register(method.clone(), timeout);
        if let Err(e) = self.send(Message::Request {
            id,
            method,
            params,
        }) {
            self.rpc.forget(id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(Error::new(ErrorKind::Canceled)),
            Err(_elapsed) => {
                self.rpc.forget(id);
                Err(Error::new(ErrorKind::TimedOut))
            }
        }
    }
}

impl Cancelable for SocketCore {
    /// reactor-shutdown counterpart to `disconnect()`: same state
    /// transitions, but the eventual `onDisconnect` carries `ECANCELED`
    /// instead of `Error::OK`.
    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            SocketState::Disconnected | SocketState::Disconnecting => {}
            SocketState::Connecting => {
                if let Some(cancel) = self.cancel_connect.lock().unwrap().take() {
                    let _ = cancel.send(());
                }
                *state = SocketState::Disconnecting;
            }
            SocketState::Connected => {
                *state = SocketState::Disconnecting;
                drop(state);
                if let Some(tx) = self.outbound.lock().unwrap().as_ref() {
                    let _ = tx.send(SocketCommand::Disconnect(Error::new(ErrorKind::Canceled)));
                }
            }
        }
    }
}

/// a `Socket` known at compile time to be `Ws`-backed; exposes the
/// WS-specific request context without an `as<WSSocket>()`-style downcast.
pub struct WsSocket(Socket);

impl TryFrom<Socket> for WsSocket {
    type Error = Socket;

    fn try_from(socket: Socket) -> Result<Self, Self::Error> {
        if socket.kind() == SocketKind::Ws {
            Ok(Self(socket))
        } else {
            Err(socket)
        }
    }
}

impl WsSocket {
    pub fn inner(&self) -> &Socket {
        &self.0
    }

    pub fn ws_request_context(&self) -> Option<WsRequestContext> {
        self.0.ws_request.clone()
    }
}

/// a `Socket` known at compile time to be `Wss`-backed; exposes the
/// WSS-specific request context plus the TLS peer-certificate accessors.
#[cfg(feature = "tls")]
pub struct WssSocket(Socket);

#[cfg(feature = "tls")]
impl TryFrom<Socket> for WssSocket {
    type Error = Socket;

    fn try_from(socket: Socket) -> Result<Self, Self::Error> {
        if socket.kind() == SocketKind::Wss {
            Ok(Self(socket))
        } else {
            Err(socket)
        }
    }
}

#[cfg(feature = "tls")]
impl WssSocket {
    pub fn inner(&self) -> &Socket {
        &self.0
    }

    pub fn ws_request_context(&self) -> Option<WsRequestContext> {
        self.0.ws_request.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::Arc as StdArc;

    #[derive(Default)]
    struct RecordingHandler {
        connected: AtomicBool,
        disconnect_kind: Mutex<Option<ErrorKind>>,
        messages: AtomicU32,
        notify: tokio::sync::Notify,
    }

    impl Handler for RecordingHandler {
        fn on_connect(&self, _socket: Socket) {
            self.connected.store(true, Ordering::SeqCst);
            self.notify.notify_one();
        }
        fn on_disconnect(&self, _socket: Socket, error: Error) {
            *self.disconnect_kind.lock().unwrap() = Some(error.kind);
            self.notify.notify_one();
        }
        fn on_message(&self, _socket: Socket, _message: Message) {
            self.messages.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    fn make_socket(handler: &StdArc<RecordingHandler>) -> Socket {
        SocketCore::new(
            SocketKind::Tcp,
            StdArc::downgrade(handler) as Weak<dyn Handler + Send + Sync>,
            Duration::from_millis(200),
            None,
            None,
            #[cfg(feature = "tls")]
            None,
        )
    }

    #[tokio::test]
    async fn connect_refused_reports_connrefused() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        // port 1 is reserved and nothing should be listening there in test sandboxes
        socket.connect("127.0.0.1", 1).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handler.notify.notified())
            .await
            .unwrap();
        assert!(!handler.connected.load(Ordering::SeqCst));
        assert_eq!(
            handler.disconnect_kind.lock().unwrap().unwrap(),
            ErrorKind::ConnRefused
        );
    }

    #[tokio::test]
    async fn double_connect_is_ealready() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        socket.connect("127.0.0.1", 1).unwrap();
        let err = socket.connect("127.0.0.1", 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Already);
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_ealready() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        assert_eq!(socket.disconnect().unwrap_err().kind, ErrorKind::Already);
    }

    #[test]
    fn ws_socket_try_from_rejects_non_ws_sockets() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        assert!(WsSocket::try_from(socket).is_err());
    }

    #[tokio::test]
    async fn disconnect_during_connecting_cancels_and_transitions_to_disconnecting() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        *socket.state.lock().unwrap() = SocketState::Connecting;
        *socket.cancel_connect.lock().unwrap() = Some(cancel_tx);

        socket.disconnect().unwrap();

        assert_eq!(socket.state(), SocketState::Disconnecting);
        assert!(cancel_rx.await.is_ok(), "disconnect() must fire the cancel signal");
    }

    #[cfg(feature = "tls")]
    #[test]
    fn cert_accessors_report_enotconn_while_disconnected() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        assert_eq!(socket.verify_result().kind, ErrorKind::NotConn);
        assert!(!socket.present_peer_certificate());
        assert_eq!(socket.peer_certificate().unwrap_err().kind, ErrorKind::NotConn);
        assert_eq!(socket.peer_certificate_chain().unwrap_err().kind, ErrorKind::NotConn);
    }

    #[cfg(feature = "tls")]
    #[test]
    fn cert_accessors_ignore_a_stale_snapshot_after_disconnecting() {
        let handler = StdArc::new(RecordingHandler::default());
        let socket = make_socket(&handler);
        *socket.cert_info.lock().unwrap() = Some(CertInfo {
            verify_result: Error::OK,
            present: true,
            peer_certificate: None,
            chain: None,
        });
        // state is still Disconnected even though a prior epoch left a cached snapshot.
        assert_eq!(socket.verify_result().kind, ErrorKind::NotConn);
        assert!(!socket.present_peer_certificate());
    }
}
