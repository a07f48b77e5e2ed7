//! crate-wide error taxonomy: network, protocol, TLS, state and resource kinds.

use thiserror::Error;

/// tagged error kind, matching the `linear` wire/state taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// no error
    Ok,
    /// connect() rejected by the peer
    ConnRefused,
    /// connect() or a pending request exceeded its deadline
    TimedOut,
    /// the peer reset the connection
    ConnReset,
    /// an operation is invalid because the socket is already in that state / already connected
    Already,
    /// an operation requires CONNECTING or CONNECTED but the socket is DISCONNECTED
    NotConn,
    /// a caller-supplied argument is invalid, or a frame failed to parse
    Invalid,
    /// allocation of a stream or buffer failed
    NoMem,
    /// websocket handshake failure
    Ws,
    /// certificate / TLS verification failure
    X509,
    /// operation was cancelled (reactor shutdown, pending connect torn down)
    Canceled,
}

impl ErrorKind {
    /// short code string, used in `Display` and in log fields
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Ok => "OK",
            ErrorKind::ConnRefused => "ECONNREFUSED",
            ErrorKind::TimedOut => "ETIMEDOUT",
            ErrorKind::ConnReset => "ECONNRESET",
            ErrorKind::Already => "EALREADY",
            ErrorKind::NotConn => "ENOTCONN",
            ErrorKind::Invalid => "EINVAL",
            ErrorKind::NoMem => "ENOMEM",
            ErrorKind::Ws => "EWS",
            ErrorKind::X509 => "EX509",
            ErrorKind::Canceled => "ECANCELED",
        }
    }
}

/// a tagged error: kind plus an optional transport-specific sub-code
/// (e.g. an OpenSSL error code for `X509`, an HTTP status for `Ws`).
///
/// equality is by `(kind, sub_code)`, matching `spec.md`'s `Error` data model.
#[derive(Debug, Clone, Copy, Error)]
#[error("{}{}", self.kind.code(), DisplaySubCode(self.sub_code))]
pub struct Error {
    pub kind: ErrorKind,
    pub sub_code: i32,
}

struct DisplaySubCode(i32);

impl std::fmt::Display for DisplaySubCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            Ok(())
        } else {
            write!(f, "({})", self.0)
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.sub_code == other.sub_code
    }
}
impl Eq for Error {}

impl Error {
    pub const OK: Error = Error::new(ErrorKind::Ok);

    /// construct an error with no sub-code
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, sub_code: 0 }
    }

    /// construct an error carrying a transport-specific sub-code
    pub const fn with_sub_code(kind: ErrorKind, sub_code: i32) -> Self {
        Self { kind, sub_code }
    }

    /// true iff this is the `Ok` sentinel
    pub fn is_ok(&self) -> bool {
        self.kind == ErrorKind::Ok
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        let kind = match e.kind() {
            IoKind::ConnectionRefused => ErrorKind::ConnRefused,
            IoKind::ConnectionReset | IoKind::BrokenPipe | IoKind::UnexpectedEof => {
                ErrorKind::ConnReset
            }
            IoKind::TimedOut => ErrorKind::TimedOut,
            IoKind::NotConnected => ErrorKind::NotConn,
            IoKind::InvalidData | IoKind::InvalidInput => ErrorKind::Invalid,
            IoKind::OutOfMemory => ErrorKind::NoMem,
            _ => ErrorKind::Invalid,
        };
        Error::with_sub_code(kind, e.raw_os_error().unwrap_or(0))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::new(ErrorKind::TimedOut)
    }
}

#[cfg(feature = "tls")]
impl From<openssl::ssl::Error> for Error {
    fn from(e: openssl::ssl::Error) -> Self {
        let sub_code = e.code().as_raw();
        Error::with_sub_code(ErrorKind::X509, sub_code)
    }
}

#[cfg(feature = "tls")]
impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        let sub_code = e.errors().first().map(|e| e.code()).unwrap_or(0) as i32;
        Error::with_sub_code(ErrorKind::X509, sub_code)
    }
}

/// handshake/protocol errors, folded into `ErrorKind::Ws`/`ErrorKind::Invalid`
/// at the socket boundary; kept distinct internally the way the teacher crate
/// separates `WsError` from `ProtocolError`.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("invalid uri `{0}`")]
    InvalidUri(String),
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("authentication required but no credentials supplied")]
    AuthRequired,
    #[error("authentication rejected")]
    AuthRejected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<WsError> for Error {
    fn from(_: WsError) -> Self {
        Error::new(ErrorKind::Ws)
    }
}

/// frame-level decode errors, folded into `ErrorKind::Invalid` at the socket boundary
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("insufficient data len {0}")]
    InsufficientLen(usize),
    #[error("invalid leading bits {0:b}")]
    InvalidLeadingBits(u8),
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    #[error("control frame is too big {0}")]
    ControlFrameTooBig(usize),
    #[error("invalid close frame payload len, expect 0 or >= 2")]
    InvalidCloseFramePayload,
    #[error("invalid utf-8 text")]
    InvalidUtf8,
    #[error("frame of {0} bytes exceeds max frame size {1}")]
    PayloadTooLarge(usize, usize),
    #[error("messagepack decode error: {0}")]
    MsgPackDecode(String),
    #[error("messagepack encode error: {0}")]
    MsgPackEncode(String),
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
}

impl From<ProtocolError> for Error {
    fn from(_: ProtocolError) -> Self {
        Error::new(ErrorKind::Invalid)
    }
}
