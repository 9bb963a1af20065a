//! Client-side connector
//!
//! [`connect`] dials a `ws://` URI over TCP; [`connect_on`] runs the same
//! upgrade over a caller-supplied stream, which is how a TLS wrapper layers
//! `wss` on top without this module knowing about it.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handshake::{self, MAX_HEADER_SIZE};
use crate::protocol::Role;

/// Connect to a WebSocket server by URI
///
/// Only the `ws` scheme is accepted here; TLS clients establish their own
/// stream and use [`connect_on`]. The configured subprotocol, when set, is
/// offered to the server.
pub async fn connect(uri: &str, config: Config) -> Result<Connection<TcpStream>> {
    let target = Target::parse(uri)?;

    let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
    stream.set_nodelay(true).ok();

    connect_on(stream, &target.host_header(), &target.path, config).await
}

/// Perform the client upgrade over an existing stream
///
/// Sends the GET upgrade request, validates the 101 response including the
/// `Sec-WebSocket-Accept` echo of our key, and returns an open connection
/// in the client role.
pub async fn connect_on<S>(
    mut stream: S,
    host: &str,
    path: &str,
    config: Config,
) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = handshake::generate_key();
    let offered: Vec<String> = config.subprotocol.iter().cloned().collect();
    let request = handshake::build_request(host, path, &key, config.version, &offered);

    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if buf.len() > MAX_HEADER_SIZE {
            return Err(Error::InvalidHttp("response too large"));
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        let (response, consumed) = match handshake::parse_response(&buf)? {
            Some(parsed) => parsed,
            None => continue,
        };

        if response.status != 101 {
            return Err(Error::FailedUpgrade(response.status));
        }

        // The accept key proves the server actually ran the WebSocket
        // handshake rather than replaying an unrelated 101
        let accept = response
            .accept
            .as_deref()
            .ok_or(Error::Handshake("missing Sec-WebSocket-Accept"))?;
        if !handshake::validate_accept_key(&key, accept) {
            return Err(Error::Handshake("invalid Sec-WebSocket-Accept"));
        }

        // A subprotocol we never offered is a negotiation violation
        if let Some(granted) = &response.subprotocol {
            if !offered.iter().any(|p| p == granted) {
                return Err(Error::ProtocolMismatch);
            }
        }

        debug!(
            host,
            path,
            subprotocol = response.subprotocol.as_deref(),
            "websocket upgrade completed"
        );

        let leftover = buf.split_off(consumed);
        return Ok(Connection::from_handshake(
            stream,
            Role::Client,
            config,
            response.subprotocol,
            leftover,
        ));
    }
}

/// Parsed `ws://` connect target
#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    explicit_port: bool,
    path: String,
}

impl Target {
    fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or(Error::InvalidHttp("URI missing scheme"))?;

        if scheme != "ws" {
            return Err(Error::WrongUriScheme);
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, port, explicit_port) = match authority.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidHttp("invalid port"))?;
                (host, port, true)
            }
            None => (authority, 80, false),
        };

        if host.is_empty() {
            return Err(Error::InvalidHttp("URI missing host"));
        }

        Ok(Target {
            host: host.to_string(),
            port,
            explicit_port,
            path: path.to_string(),
        })
    }

    /// The Host header value, carrying the port only when it was explicit
    fn host_header(&self) -> String {
        if self.explicit_port && self.port != 80 {
            format!("{}:{}", self.host, self.port)
        } else {
            self.host.clone()
        }
    }
}
