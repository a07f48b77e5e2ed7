//! wire codec: MessagePack-RPC framing over a byte stream.

pub mod message;

pub use message::{Message, MessageCodec};
