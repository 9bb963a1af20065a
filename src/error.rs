//! Error types for the WebSocket library

use std::fmt;
use std::io;

/// Result type alias for WebSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// WebSocket error types
///
/// Every variant except `MaxMessageSizeExceeded` is terminal for the
/// connection: the engine transitions to `Closed` and releases the stream
/// before the error surfaces.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying stream
    Io(io::Error),
    /// Short read or unparseable bytes in a frame or HTTP header
    MalformedHeader(&'static str),
    /// A reserved bit was set without a negotiated extension
    RsvMismatch,
    /// Mask bit direction wrong for the endpoint role
    MaskMismatch(&'static str),
    /// Reserved opcode observed on the wire
    OpcodeUnknown(u8),
    /// Control frame declared a payload larger than 125 bytes
    ControlFrameTooLarge(u64),
    /// Control frame without the FIN bit
    ControlFrameFragmented,
    /// Other protocol violation (opcode sequencing, close payload, ...)
    Protocol(&'static str),
    /// Invalid UTF-8 in a text message or close reason
    InvalidUtf8,
    /// Close frame carried a code outside the RFC 6455 ranges
    InvalidCloseCode(u16),
    /// Inbound message grew past the configured cap
    MaxMessageSizeExceeded {
        /// Bytes accumulated when the cap was hit
        size: usize,
        /// The configured cap
        limit: usize,
    },
    /// Operation attempted on a non-open connection
    Closed,
    /// Peer ended the stream without a close handshake
    ConnectionClosed,
    /// Underlying write ended short
    SendError,
    /// Client saw a non-101 response status
    FailedUpgrade(u16),
    /// Peer's `Sec-WebSocket-Version` did not match the configured version
    VersionMismatch,
    /// Subprotocol negotiation conflict
    ProtocolMismatch,
    /// Other handshake prerequisite missing or invalid
    Handshake(&'static str),
    /// Invalid HTTP in the upgrade exchange
    InvalidHttp(&'static str),
    /// Client `connect` called with a scheme other than `ws`
    WrongUriScheme,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::MalformedHeader(msg) => write!(f, "malformed header: {}", msg),
            Error::RsvMismatch => write!(f, "reserved bit set without negotiated extension"),
            Error::MaskMismatch(msg) => write!(f, "mask mismatch: {}", msg),
            Error::OpcodeUnknown(op) => write!(f, "unknown opcode: {:#x}", op),
            Error::ControlFrameTooLarge(len) => {
                write!(f, "control frame payload too large: {} bytes", len)
            }
            Error::ControlFrameFragmented => write!(f, "control frame must not be fragmented"),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8 in text payload"),
            Error::InvalidCloseCode(code) => write!(f, "invalid close code: {}", code),
            Error::MaxMessageSizeExceeded { size, limit } => {
                write!(f, "message too large: {} bytes (max: {})", size, limit)
            }
            Error::Closed => write!(f, "connection is not open"),
            Error::ConnectionClosed => write!(f, "connection closed"),
            Error::SendError => write!(f, "underlying write ended short"),
            Error::FailedUpgrade(status) => {
                write!(f, "upgrade failed: expected 101, got {}", status)
            }
            Error::VersionMismatch => write!(f, "unsupported WebSocket version"),
            Error::ProtocolMismatch => write!(f, "subprotocol negotiation failed"),
            Error::Handshake(msg) => write!(f, "handshake failed: {}", msg),
            Error::InvalidHttp(msg) => write!(f, "invalid HTTP: {}", msg),
            Error::WrongUriScheme => write!(f, "URI scheme must be ws"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::ConnectionReset => Error::ConnectionClosed,
            io::ErrorKind::WriteZero => Error::SendError,
            _ => Error::Io(e),
        }
    }
}

/// Close frame reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Optional reason string
    pub reason: String,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Unsupported data
    pub const UNSUPPORTED: u16 = 1003;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Policy violation
    pub const POLICY: u16 = 1008;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Internal server error
    pub const INTERNAL: u16 = 1011;

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if the close code may appear on the wire per RFC 6455
    pub fn is_valid_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_close_codes() {
        assert!(CloseReason::is_valid_code(1000));
        assert!(CloseReason::is_valid_code(1011));
        assert!(CloseReason::is_valid_code(3000));
        assert!(CloseReason::is_valid_code(4999));
        assert!(!CloseReason::is_valid_code(999));
        assert!(!CloseReason::is_valid_code(1005));
        assert!(!CloseReason::is_valid_code(1006));
        assert!(!CloseReason::is_valid_code(2999));
        assert!(!CloseReason::is_valid_code(5000));
    }

    #[test]
    fn eof_maps_to_connection_closed() {
        let e: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(e, Error::ConnectionClosed));
    }
}
