//! # Riptide-WS: RFC 6455 WebSocket endpoint library
//!
//! A WebSocket implementation covering the frame codec, the HTTP/1.1 opening
//! handshake, and an async connection engine for both endpoint roles, built
//! on Tokio.
//!
//! The library operates on any already-established bidirectional byte stream
//! (`AsyncRead + AsyncWrite`); TLS negotiation and the surrounding HTTP
//! server are external collaborators.
//!
//! ## Features
//!
//! - **Streaming reads**: `recv_into` fills a caller buffer directly from the
//!   wire, unmasking incrementally, without buffering whole frames
//! - **Interleaved control frames**: ping/pong/close are absorbed
//!   transparently while a fragmented message is being read
//! - **Chunked sends**: outbound messages are fragmented at a configurable
//!   frame size
//! - **Both roles**: client initiator (`client::connect`) and server
//!   responder (`server::accept` / `server::respond`)
//!
//! ## Example
//!
//! ```ignore
//! use riptide_ws::{server, Config, Message};
//!
//! async fn handle(stream: tokio::net::TcpStream) -> riptide_ws::Result<()> {
//!     let mut conn = server::accept(stream, Config::default()).await?;
//!     loop {
//!         match conn.recv_message().await? {
//!             Message::Text(text) => conn.send_text(&text).await?,
//!             Message::Binary(data) => conn.send_binary(&data).await?,
//!             Message::Close(_) => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod protocol;
pub mod server;

pub use connection::{Connection, ReadHalf, WriteHalf};
pub use error::{CloseReason, Error, Result};
pub use frame::{FrameHeader, OpCode};
pub use protocol::{Message, ReadyState, Role};

/// WebSocket GUID appended to the client key when deriving the accept key
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Largest payload representable with the 7-bit length field
pub const SMALL_PAYLOAD_THRESHOLD: usize = 125;

/// Largest payload representable with the 16-bit extended length field
pub const MEDIUM_PAYLOAD_THRESHOLD: usize = 65535;

/// Maximum payload of a control frame (RFC 6455 section 5.5)
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Control callback invoked from the receive path with the frame payload.
///
/// Callbacks run synchronously before the control frame is answered; they
/// must not block or re-enter the connection.
pub type ControlHook = fn(&[u8]);

/// Configuration for WebSocket connections
///
/// # Example
///
/// ```
/// use riptide_ws::Config;
///
/// let config = Config::builder()
///     .max_frame_size(4 * 1024)
///     .max_message_size(16 * 1024 * 1024)
///     .subprotocol("chat")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Outbound fragmentation threshold in bytes (default: 256)
    pub max_frame_size: usize,
    /// Maximum inbound message size in bytes (default: 1 MiB)
    pub max_message_size: usize,
    /// Required `Sec-WebSocket-Version` value (default: 13)
    pub version: u16,
    /// Subprotocol to negotiate, if any
    pub subprotocol: Option<String>,
    /// Invoked with the ping payload before the pong echo is sent
    pub on_ping: Option<ControlHook>,
    /// Invoked with the payload of every received pong
    pub on_pong: Option<ControlHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: 256,
            max_message_size: 1024 * 1024,
            version: 13,
            subprotocol: None,
            on_ping: None,
            on_pong: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for WebSocket configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the outbound fragmentation threshold
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum inbound message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the required WebSocket version
    pub fn version(mut self, version: u16) -> Self {
        self.config.version = version;
        self
    }

    /// Set the subprotocol to negotiate
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.subprotocol = Some(protocol.into());
        self
    }

    /// Set the ping callback
    pub fn on_ping(mut self, hook: ControlHook) -> Self {
        self.config.on_ping = Some(hook);
        self
    }

    /// Set the pong callback
    pub fn on_pong(mut self, hook: ControlHook) -> Self {
        self.config.on_pong = Some(hook);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::connection::Connection;
    pub use crate::error::{Error, Result};
    pub use crate::frame::{FrameHeader, OpCode};
    pub use crate::protocol::{Message, ReadyState, Role};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_frame_size, 256);
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.version, 13);
        assert!(config.subprotocol.is_none());
    }

    #[test]
    fn builder_overrides() {
        let config = Config::builder()
            .max_frame_size(300)
            .max_message_size(1024)
            .subprotocol("chat")
            .build();
        assert_eq!(config.max_frame_size, 300);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.subprotocol.as_deref(), Some("chat"));
    }
}
