//! WebSocket opening handshake mechanics
//!
//! HTTP/1.1 Upgrade parsing and construction for both roles. The async
//! drivers that run the exchange over a stream live in [`crate::server`] and
//! [`crate::client`]; everything here is pure so it can be exercised without
//! I/O.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::{Config, WS_GUID};

/// Maximum HTTP header size accepted during the handshake
pub const MAX_HEADER_SIZE: usize = 8192;

/// Derive the `Sec-WebSocket-Accept` value for a client key
///
/// Computes `Base64(SHA-1(key || GUID))` with the literal RFC 6455 GUID.
#[inline]
pub fn derive_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Generate a fresh `Sec-WebSocket-Key` value (client side)
///
/// A 16-byte CSPRNG nonce, Base64-encoded.
pub fn generate_key() -> String {
    base64::engine::general_purpose::STANDARD.encode(crate::mask::generate_nonce())
}

/// Validate the server's accept key against the key the client sent
#[inline]
pub fn validate_accept_key(sent_key: &str, received_accept: &str) -> bool {
    derive_accept_key(sent_key) == received_accept.trim()
}

/// A parsed WebSocket upgrade request
///
/// This is the narrow interface an HTTP collaborator hands the library:
/// the request path plus case-insensitive header lookup. It can be built
/// from raw bytes with [`UpgradeRequest::parse`] or assembled directly from
/// already-parsed headers with [`UpgradeRequest::new`].
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Build a request from an already-parsed header list
    pub fn new(path: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            path: path.into(),
            headers,
        }
    }

    /// The request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Case-insensitive header lookup; values are whitespace-trimmed
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    }

    /// Parse an upgrade request from raw bytes
    ///
    /// Returns the request and the number of bytes consumed, or `None` when
    /// the buffer does not yet hold the complete header block.
    pub fn parse(buf: &[u8]) -> Result<Option<(UpgradeRequest, usize)>> {
        if buf.len() > MAX_HEADER_SIZE {
            return Err(Error::InvalidHttp("request too large"));
        }

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => {
                if req.method != Some("GET") {
                    return Err(Error::InvalidHttp("method must be GET"));
                }

                let mut upgrade = false;
                let mut connection_upgrade = false;
                let mut parsed = Vec::with_capacity(req.headers.len());

                for header in req.headers.iter() {
                    let value = std::str::from_utf8(header.value)
                        .map_err(|_| Error::InvalidHttp("invalid header value"))?;

                    if header.name.eq_ignore_ascii_case("upgrade")
                        && value.to_ascii_lowercase().contains("websocket")
                    {
                        upgrade = true;
                    }
                    if header.name.eq_ignore_ascii_case("connection")
                        && value.to_ascii_lowercase().contains("upgrade")
                    {
                        connection_upgrade = true;
                    }

                    parsed.push((header.name.to_string(), value.to_string()));
                }

                if !upgrade {
                    return Err(Error::Handshake("missing Upgrade: websocket"));
                }
                if !connection_upgrade {
                    return Err(Error::Handshake("missing Connection: Upgrade"));
                }

                let path = req.path.unwrap_or("/").to_string();
                Ok(Some((UpgradeRequest::new(path, parsed), len)))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(_) => Err(Error::InvalidHttp("failed to parse HTTP request")),
        }
    }
}

/// Outcome of server-side negotiation
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// The derived `Sec-WebSocket-Accept` value
    pub accept_key: String,
    /// The subprotocol to echo back, when one was agreed
    pub subprotocol: Option<String>,
}

/// Negotiate an upgrade request against the server configuration
///
/// Checks the protocol version, extracts the client key, and resolves the
/// subprotocol: a configured subprotocol must appear in the client's offer
/// when the offer header is present; with no configured subprotocol the
/// header is ignored.
pub fn negotiate(request: &UpgradeRequest, config: &Config) -> Result<Negotiated> {
    let version = request
        .header("sec-websocket-version")
        .ok_or(Error::VersionMismatch)?;
    if version.parse::<u16>() != Ok(config.version) {
        return Err(Error::VersionMismatch);
    }

    let key = request
        .header("sec-websocket-key")
        .ok_or(Error::Handshake("missing Sec-WebSocket-Key"))?;
    if key.is_empty() {
        return Err(Error::Handshake("empty Sec-WebSocket-Key"));
    }

    let subprotocol = match (&config.subprotocol, request.header("sec-websocket-protocol")) {
        (Some(configured), Some(offered)) => {
            if offered.split(',').any(|p| p.trim() == configured) {
                Some(configured.clone())
            } else {
                return Err(Error::ProtocolMismatch);
            }
        }
        _ => None,
    };

    Ok(Negotiated {
        accept_key: derive_accept_key(key),
        subprotocol,
    })
}

/// Build the 101 upgrade response
pub fn build_response(accept_key: &str, subprotocol: Option<&str>) -> Bytes {
    let mut buf = BytesMut::with_capacity(192);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");

    if let Some(proto) = subprotocol {
        buf.put_slice(b"Sec-WebSocket-Protocol: ");
        buf.put_slice(proto.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Build the client upgrade request
pub fn build_request(host: &str, path: &str, key: &str, version: u16, protocols: &[String]) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    buf.put_slice(b"Host: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Cache-Control: no-cache\r\n");
    buf.put_slice(b"Sec-WebSocket-Version: ");
    buf.put_slice(version.to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Sec-WebSocket-Key: ");
    buf.put_slice(key.as_bytes());
    buf.put_slice(b"\r\n");

    if !protocols.is_empty() {
        buf.put_slice(b"Sec-WebSocket-Protocol: ");
        buf.put_slice(protocols.join(", ").as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// A parsed upgrade response (client side)
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    /// HTTP status code
    pub status: u16,
    /// The `Sec-WebSocket-Accept` header
    pub accept: Option<String>,
    /// The `Sec-WebSocket-Protocol` header
    pub subprotocol: Option<String>,
}

/// Parse the server's upgrade response
///
/// Returns the response and the number of bytes consumed, or `None` when the
/// header block is still incomplete. Status validation is the caller's job.
pub fn parse_response(buf: &[u8]) -> Result<Option<(UpgradeResponse, usize)>> {
    if buf.len() > MAX_HEADER_SIZE {
        return Err(Error::InvalidHttp("response too large"));
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let status = res.code.unwrap_or(0);
            let mut accept = None;
            let mut subprotocol = None;

            for header in res.headers.iter() {
                let value = std::str::from_utf8(header.value)
                    .map_err(|_| Error::InvalidHttp("invalid header value"))?;

                if header.name.eq_ignore_ascii_case("sec-websocket-accept") {
                    accept = Some(value.trim().to_string());
                } else if header.name.eq_ignore_ascii_case("sec-websocket-protocol") {
                    subprotocol = Some(value.trim().to_string());
                }
            }

            Ok(Some((
                UpgradeResponse {
                    status,
                    accept,
                    subprotocol,
                },
                len,
            )))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(_) => Err(Error::InvalidHttp("failed to parse HTTP response")),
    }
}
