//! Server-side upgrade drivers
//!
//! Two entry points cover the two integration shapes: [`respond`] takes an
//! already-parsed [`UpgradeRequest`] from an HTTP layer that owns request
//! parsing, and [`accept`] reads and parses the upgrade request itself for
//! standalone listeners. Both write the 101 response and hand back an open
//! [`Connection`] in the server role.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handshake::{self, MAX_HEADER_SIZE};
use crate::protocol::Role;

pub use crate::handshake::UpgradeRequest;

/// Accept a WebSocket connection on a raw stream
///
/// Reads the HTTP upgrade request from the stream, negotiates, and responds.
/// Frame bytes the client pipelined behind its request are preserved.
pub async fn accept<S>(mut stream: S, config: Config) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if buf.len() > MAX_HEADER_SIZE {
            return Err(Error::InvalidHttp("request too large"));
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        if let Some((request, consumed)) = UpgradeRequest::parse(&buf)? {
            let leftover = buf.split_off(consumed);
            return respond_inner(stream, &request, config, leftover).await;
        }
    }
}

/// Respond to an already-parsed upgrade request
///
/// This is the narrow interface for an external HTTP layer: it hands over
/// the parsed request headers and the byte stream once it has decided to
/// upgrade. On a negotiation error no response is written; the HTTP layer
/// is expected to answer with its own 4xx.
pub async fn respond<S>(stream: S, request: &UpgradeRequest, config: Config) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    respond_inner(stream, request, config, BytesMut::new()).await
}

async fn respond_inner<S>(
    mut stream: S,
    request: &UpgradeRequest,
    config: Config,
    leftover: BytesMut,
) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let negotiated = handshake::negotiate(request, &config)?;
    let response =
        handshake::build_response(&negotiated.accept_key, negotiated.subprotocol.as_deref());

    // The connection is only usable once the full response went out
    if stream.write_all(&response).await.is_err() || stream.flush().await.is_err() {
        return Err(Error::SendError);
    }

    debug!(
        path = request.path(),
        subprotocol = negotiated.subprotocol.as_deref(),
        "websocket upgrade accepted"
    );

    Ok(Connection::from_handshake(
        stream,
        Role::Server,
        config,
        negotiated.subprotocol,
        leftover,
    ))
}
