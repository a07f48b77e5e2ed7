//! multi-transport, event-driven socket library: TCP/TLS/WS/WSS connections
//! under one [`Handler`] callback surface, with a MessagePack-RPC layer
//! (request/response/notify) framed on top.
//!
//! a single background thread (the [`reactor`]) owns every connection's I/O;
//! [`Socket`](socket::Socket) handles are cheap, `Send + Sync`, and safe to
//! call from any thread, including from inside a `Handler` callback.

#![warn(missing_docs)]

/// host/port resolution.
pub mod addr;
/// HTTP Basic/Digest authentication for the websocket handshake.
pub mod auth;
/// outbound socket factory.
pub mod client;
/// wire codec: MessagePack-RPC framing.
pub mod codec;
/// crate-wide error taxonomy.
pub mod error;
/// RFC 6455 websocket frame header bit layout and masking.
pub mod frame;
/// the user-facing callback surface.
pub mod handler;
/// RFC 6455 HTTP Upgrade handshake.
pub mod handshake;
/// the dedicated background-thread runtime every socket runs on.
pub mod reactor;
/// outstanding-request bookkeeping for the RPC layer.
pub mod rpc;
/// inbound listener.
pub mod server;
/// the socket handle: state machine, connect/disconnect/send.
pub mod socket;
/// uniform connect/read/write/close over TCP, TLS, WS and WSS.
pub mod stream;
/// TLS context: certificate/key/CA configuration.
#[cfg(feature = "tls")]
pub mod tls;

pub use client::Client;
pub use codec::message::Message;
pub use error::{Error, ErrorKind};
pub use handler::Handler;
pub use server::Server;
pub use socket::{Socket, SocketKind, SocketState, WsSocket};
#[cfg(feature = "tls")]
pub use socket::WssSocket;
