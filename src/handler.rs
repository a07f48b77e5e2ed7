//! the user-facing callback surface, delivered from the reactor thread.

use crate::codec::message::Message;
use crate::error::Error;
use crate::socket::Socket;

/// capability set a user delegate implements to observe a socket's lifecycle.
///
/// all methods have no-op default bodies: a handler that only cares about
/// `on_message` does not need to override the others.
pub trait Handler: Send + Sync {
    /// CONNECTING -> CONNECTED, or a server accepting a new peer.
    fn on_connect(&self, _socket: Socket) {}

    /// the terminal callback for an epoch; delivered exactly once.
    fn on_disconnect(&self, _socket: Socket, _error: Error) {}

    /// a fully-framed application message arrived, in network order.
    fn on_message(&self, _socket: Socket, _message: Message) {}

    /// a send-side failure (state machine accepted `send()` but the write failed).
    fn on_error(&self, _socket: Socket, _message: Message, _error: Error) {}
}
