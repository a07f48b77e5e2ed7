//! tagged MessagePack-RPC message: `[0, id, method, params]` for a request,
//! `[1, id, error, result]` for a response, `[2, method, params]` for a
//! notify — the canonical msgpack-rpc wire shape.

use bytes::{Buf, BytesMut};
use rmpv::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

const TAG_REQUEST: u8 = 0;
const TAG_RESPONSE: u8 = 1;
const TAG_NOTIFY: u8 = 2;

/// a single MessagePack-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u32,
        method: String,
        params: Value,
    },
    Response {
        id: u32,
        result: Result<Value, Value>,
    },
    Notify {
        method: String,
        params: Value,
    },
}

impl Message {
    fn to_value(&self) -> Value {
        match self {
            Message::Request { id, method, params } => Value::Array(vec![
                Value::from(TAG_REQUEST),
                Value::from(*id),
                Value::from(method.as_str()),
                params.clone(),
            ]),
            Message::Response { id, result } => {
                let (error, ok) = match result {
                    Ok(v) => (Value::Nil, v.clone()),
                    Err(e) => (e.clone(), Value::Nil),
                };
                Value::Array(vec![Value::from(TAG_RESPONSE), Value::from(*id), error, ok])
            }
            Message::Notify { method, params } => Value::Array(vec![
                Value::from(TAG_NOTIFY),
                Value::from(method.as_str()),
                params.clone(),
            ]),
        }
    }

    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Array(mut fields) = value else {
            return Err(ProtocolError::MsgPackDecode("top-level value is not an array".into()));
        };
        if fields.is_empty() {
            return Err(ProtocolError::MsgPackDecode("empty message array".into()));
        }
        let tag = fields[0]
            .as_u64()
            .ok_or_else(|| ProtocolError::MsgPackDecode("tag is not an integer".into()))?;
        match tag as u8 {
            TAG_REQUEST if fields.len() == 4 => {
                let params = fields.pop().unwrap();
                let method = take_string(fields.pop().unwrap())?;
                let id = take_u32(fields.pop().unwrap())?;
                Ok(Message::Request { id, method, params })
            }
            TAG_RESPONSE if fields.len() == 4 => {
                let result = fields.pop().unwrap();
                let error = fields.pop().unwrap();
                let id = take_u32(fields.pop().unwrap())?;
                let result = if error.is_nil() { Ok(result) } else { Err(error) };
                Ok(Message::Response { id, result })
            }
            TAG_NOTIFY if fields.len() == 3 => {
                let params = fields.pop().unwrap();
                let method = take_string(fields.pop().unwrap())?;
                Ok(Message::Notify { method, params })
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

fn take_u32(v: Value) -> Result<u32, ProtocolError> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ProtocolError::MsgPackDecode("id is not a u32".into()))
}

fn take_string(v: Value) -> Result<String, ProtocolError> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::MsgPackDecode("method is not a string".into()))
}

/// frames [`Message`] values over a byte stream; enforces `max_frame_size`
/// before allocating, the way the teacher's `FrameDecoder` bounds a websocket
/// payload before it is read into memory.
pub struct MessageCodec {
    max_frame_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl MessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let value = item.to_value();
        let mut writer = Vec::new();
        rmpv::encode::write_value(&mut writer, &value)
            .map_err(|e| ProtocolError::MsgPackEncode(e.to_string()))?;
        if writer.len() > self.max_frame_size {
            return Err(ProtocolError::PayloadTooLarge(writer.len(), self.max_frame_size));
        }
        dst.extend_from_slice(&writer);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    /// buffered-on-incomplete-data: mirrors the teacher's `decode_single`,
    /// returning `Ok(None)` (not an error) when `src` holds a partial value.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if src.len() > self.max_frame_size {
            return Err(ProtocolError::PayloadTooLarge(src.len(), self.max_frame_size));
        }
        let mut cursor = std::io::Cursor::new(&src[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                src.advance(consumed);
                Ok(Some(Message::from_value(value)?))
            }
            Err(rmpv::decode::Error::InvalidMarkerRead(e))
            | Err(rmpv::decode::Error::InvalidDataRead(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(None)
            }
            Err(e) => Err(ProtocolError::MsgPackDecode(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_the_wire() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        let msg = Message::Request {
            id: 7,
            method: "ping".into(),
            params: Value::Array(vec![Value::from(1)]),
        };
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn notify_round_trips_through_the_wire() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        let msg = Message::Notify {
            method: "tick".into(),
            params: Value::Nil,
        };
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), msg);
    }

    #[test]
    fn response_distinguishes_ok_from_err_by_nil_error_slot() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        let ok = Message::Response {
            id: 1,
            result: Ok(Value::from("done")),
        };
        codec.encode(ok.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), ok);

        let err = Message::Response {
            id: 2,
            result: Err(Value::from("boom")),
        };
        codec.encode(err.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), err);
    }

    #[test]
    fn partial_buffer_yields_none_not_an_error() {
        let mut codec = MessageCodec::default();
        let mut full = BytesMut::new();
        codec
            .encode(
                Message::Notify {
                    method: "x".into(),
                    params: Value::Nil,
                },
                &mut full,
            )
            .unwrap();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocating() {
        let mut codec = MessageCodec::new(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(
                Message::Notify {
                    method: "too-long-a-method-name".into(),
                    params: Value::Nil,
                },
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge(_, _)));
    }
}
