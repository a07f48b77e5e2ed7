//! RFC 6455 websocket frame header bit layout and masking.

use bytes::{BufMut, BytesMut};

/// Defines the interpretation of the "Payload data". If an unknown
/// opcode is received, the receiving endpoint MUST _Fail the
/// WebSocket Connection_. The following values are defined.
/// - x0 denotes a continuation frame
/// - x1 denotes a text frame
/// - x2 denotes a binary frame
/// - x3-7 are reserved for further non-control frames
/// - x8 denotes a connection close
/// - x9 denotes a ping
/// - xA denotes a pong
/// - xB-F are reserved for further control frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// - x0 denotes a continuation frame
    Continue,
    /// - x1 denotes a text frame
    Text,
    /// - x2 denotes a binary frame
    Binary,
    /// - x3-7 are reserved for further non-control frames
    ReservedNonControl,
    /// - x8 denotes a connection close
    Close,
    /// - x9 denotes a ping
    Ping,
    /// - xA denotes a pong
    Pong,
    /// - xB-F are reserved for further control frames
    ReservedControl,
}

impl OpCode {
    /// get corresponding u8 value
    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0,
            OpCode::Text => 1,
            OpCode::Binary => 2,
            OpCode::ReservedNonControl => 3,
            OpCode::Close => 8,
            OpCode::Ping => 9,
            OpCode::Pong => 10,
            OpCode::ReservedControl => 11,
        }
    }

    /// check is control frame (close/ping/pong)
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// check is text/binary/continue
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text | Self::Binary | Self::Continue)
    }
}

#[inline]
pub(crate) fn parse_opcode(val: u8) -> OpCode {
    match val & 0x0f {
        0 => OpCode::Continue,
        1 => OpCode::Text,
        2 => OpCode::Binary,
        3..=7 => OpCode::ReservedNonControl,
        8 => OpCode::Close,
        9 => OpCode::Ping,
        10 => OpCode::Pong,
        _ => OpCode::ReservedControl,
    }
}

/// xor-mask `data` in place with the 4-byte websocket masking key
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// a single decoded websocket frame: fin bit, opcode, optional mask key and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: BytesMut,
}

impl Frame {
    /// construct an unmasked frame (server-to-client direction never masks per RFC 6455 §5.1)
    pub fn new(opcode: OpCode, payload: impl Into<BytesMut>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// construct a masked frame (client-to-server direction always masks)
    pub fn masked(opcode: OpCode, payload: impl Into<BytesMut>, mask: [u8; 4]) -> Self {
        Self {
            fin: true,
            opcode,
            mask: Some(mask),
            payload: payload.into(),
        }
    }

    /// frame carrying an already-masked client payload; unmasks a copy into plain bytes
    pub fn unmasked_payload(&self) -> BytesMut {
        let mut data = self.payload.clone();
        if let Some(mask) = self.mask {
            apply_mask(&mut data, mask);
        }
        data
    }

    /// serialize header + payload onto `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        dst.put_u8(first);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        match len {
            0..=125 => dst.put_u8(mask_bit | len as u8),
            126..=65535 => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }
        if let Some(mask) = self.mask {
            dst.extend_from_slice(&mask);
            let mut payload = self.payload.clone();
            apply_mask(&mut payload, mask);
            dst.extend_from_slice(&payload);
        } else {
            dst.extend_from_slice(&self.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for (byte, code) in [
            (0u8, OpCode::Continue),
            (1, OpCode::Text),
            (2, OpCode::Binary),
            (8, OpCode::Close),
            (9, OpCode::Ping),
            (10, OpCode::Pong),
        ] {
            assert_eq!(parse_opcode(byte), code);
            assert_eq!(code.as_u8(), byte);
        }
    }

    #[test]
    fn mask_is_involution() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut data = b"hello world".to_vec();
        let original = data.clone();
        apply_mask(&mut data, mask);
        assert_ne!(data, original);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn encode_short_frame_header() {
        let frame = Frame::new(OpCode::Text, BytesMut::from(&b"hi"[..]));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf[0], 0x80 | OpCode::Text.as_u8());
        assert_eq!(buf[1], 2);
        assert_eq!(&buf[2..], b"hi");
    }

    #[test]
    fn encode_masked_frame_round_trips_through_unmask() {
        let mask = [1, 2, 3, 4];
        let frame = Frame::masked(OpCode::Binary, BytesMut::from(&b"payload"[..]), mask);
        assert_eq!(&frame.unmasked_payload()[..], b"payload");
    }
}
