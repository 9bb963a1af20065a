//! Endpoint roles, connection lifecycle states, and the message type

use bytes::Bytes;

use crate::error::CloseReason;

/// WebSocket endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client (masks outbound frames, expects unmasked inbound frames)
    Client,
    /// Server (sends unmasked, expects masked inbound frames)
    Server,
}

impl Role {
    /// Whether inbound frames must carry a mask for this role
    #[inline]
    pub fn expect_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// Whether outbound frames are masked for this role
    #[inline]
    pub fn masks_frames(&self) -> bool {
        matches!(self, Role::Client)
    }
}

/// Connection lifecycle state
///
/// The state only ever advances: `Connecting → Open → Closing → Closed`.
/// `Closed` is terminal; the underlying stream has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting = 0,
    /// Handshake complete, frames flowing
    Open = 1,
    /// Local close sent, waiting for the peer's close
    Closing = 2,
    /// Connection finished, stream released
    Closed = 3,
}

/// A complete WebSocket message, possibly assembled from fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (UTF-8 validated on receive)
    Text(Bytes),
    /// Binary message
    Binary(Bytes),
    /// Ping payload
    Ping(Bytes),
    /// Pong payload
    Pong(Bytes),
    /// Close, with the peer's code and reason when present
    Close(Option<CloseReason>),
}

impl Message {
    /// Create a text message from a string
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(Bytes::from(s.into()))
    }

    /// Create a binary message
    #[inline]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    /// Check if this is a text message
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Check if this is a binary message
    #[inline]
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Check if this is a close message
    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Get the message payload as bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(b) => b,
            Message::Binary(b) => b,
            Message::Ping(b) => b,
            Message::Pong(b) => b,
            Message::Close(_) => &[],
        }
    }

    /// Get the message as text
    ///
    /// Returns `None` for non-text messages. Text payloads were UTF-8
    /// validated when the message was assembled.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Consume the message, returning its payload
    pub fn into_bytes(self) -> Bytes {
        match self {
            Message::Text(b) => b,
            Message::Binary(b) => b,
            Message::Ping(b) => b,
            Message::Pong(b) => b,
            Message::Close(_) => Bytes::new(),
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(Bytes::from(s))
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(v))
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Message::Binary(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_is_ordered() {
        assert!(ReadyState::Connecting < ReadyState::Open);
        assert!(ReadyState::Open < ReadyState::Closing);
        assert!(ReadyState::Closing < ReadyState::Closed);
    }

    #[test]
    fn role_mask_direction() {
        assert!(Role::Server.expect_masked());
        assert!(!Role::Client.expect_masked());
        assert!(Role::Client.masks_frames());
        assert!(!Role::Server.masks_frames());
    }

    #[test]
    fn message_accessors() {
        let msg = Message::text("héllo");
        assert!(msg.is_text());
        assert_eq!(msg.as_text(), Some("héllo"));

        let msg = Message::binary(vec![1u8, 2, 3]);
        assert!(msg.is_binary());
        assert_eq!(msg.as_bytes(), &[1, 2, 3]);
        assert_eq!(msg.into_bytes(), Bytes::from_static(&[1, 2, 3]));
    }
}
