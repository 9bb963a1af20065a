//! WebSocket connection engine
//!
//! [`Connection`] owns the byte stream exclusively and drives everything
//! after the handshake: frame parsing, control-frame interleaving, message
//! fragmentation and reassembly, and the close handshake.
//!
//! Reads are streaming: `recv_into` copies payload bytes straight from the
//! wire into the caller's buffer, unmasking incrementally, so a large frame
//! never has to be buffered whole. Control frames that arrive between data
//! fragments are absorbed before more of the message is delivered.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{CloseReason, Error, Result};
use crate::frame::{self, FrameHeader, OpCode};
use crate::mask::{apply_mask, apply_mask_offset, generate_mask};
use crate::protocol::{Message, ReadyState, Role};
use crate::{Config, MAX_CONTROL_PAYLOAD};

/// Read granularity for buffered stream reads and payload draining
const READ_CHUNK: usize = 4096;

/// The inbound frame currently being consumed
#[derive(Debug)]
struct InboundFrame {
    header: FrameHeader,
    /// Payload bytes already delivered out of this frame
    consumed: u64,
}

impl InboundFrame {
    #[inline]
    fn remaining(&self) -> u64 {
        self.header.payload_len - self.consumed
    }
}

/// A WebSocket connection over an async byte stream
///
/// Born `Open` after a successful handshake (see [`crate::client::connect`]
/// and [`crate::server::accept`]); ends `Closed` through the close
/// handshake, a fatal protocol error, or a transport error. `Closed` is
/// terminal and releases the stream.
///
/// A connection is owned by one task. For concurrent reading and writing
/// from separate tasks, use [`Connection::split`].
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    role: Role,
    state: ReadyState,
    config: Config,
    subprotocol: Option<String>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Frame under assembly; `None` when a fresh frame is expected
    current: Option<InboundFrame>,
    /// Opcode of the message in progress, for sequencing enforcement
    message_opcode: Option<OpCode>,
    /// True while a frame write is in flight; still set on the next call
    /// when that write was cancelled mid-frame
    write_in_progress: bool,
    close_received: bool,
    peer_close: Option<CloseReason>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a connection from an already-upgraded stream
    pub fn from_upgraded(stream: S, role: Role, config: Config) -> Self {
        Self::from_handshake(stream, role, config, None, BytesMut::new())
    }

    /// Create a connection carrying handshake results
    ///
    /// `leftover` holds any bytes the handshake read past the HTTP header
    /// block; they are the first frame bytes.
    pub(crate) fn from_handshake(
        stream: S,
        role: Role,
        config: Config,
        subprotocol: Option<String>,
        leftover: BytesMut,
    ) -> Self {
        Self {
            stream,
            role,
            state: ReadyState::Open,
            config,
            subprotocol,
            read_buf: leftover,
            write_buf: BytesMut::with_capacity(256),
            current: None,
            message_opcode: None,
            write_in_progress: false,
            close_received: false,
            peer_close: None,
        }
    }

    /// Current lifecycle state
    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    /// Endpoint role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Negotiated subprotocol, if any
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Close reason the peer sent, when one was received
    pub fn peer_close_reason(&self) -> Option<&CloseReason> {
        self.peer_close.as_ref()
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the connection and return the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a complete message
    ///
    /// Data payloads are split into frames of at most `max_frame_size`
    /// bytes: the first frame carries `opcode`, later frames are
    /// continuations, and only the last one has FIN set. Control opcodes go
    /// out as a single frame. In the client role every frame is masked with
    /// a fresh key.
    pub async fn send(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        if self.state != ReadyState::Open {
            return Err(Error::Closed);
        }

        if opcode == OpCode::Close {
            return self.close(payload).await;
        }
        if opcode.is_control() {
            if payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload.len() as u64));
            }
            return self.write_frame(opcode, payload, true).await;
        }
        if opcode == OpCode::Continuation {
            return Err(Error::Protocol("cannot send a bare continuation frame"));
        }

        let max = self.config.max_frame_size.max(1);
        let mut offset = 0;
        loop {
            let end = (offset + max).min(payload.len());
            let fin = end == payload.len();
            let op = if offset == 0 {
                opcode
            } else {
                OpCode::Continuation
            };
            self.write_frame(op, &payload[offset..end], fin).await?;
            if fin {
                return Ok(());
            }
            offset = end;
        }
    }

    /// Send a text message
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes(), OpCode::Text).await
    }

    /// Send a binary message
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send(data, OpCode::Binary).await
    }

    /// Send a ping frame
    pub async fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Ping).await
    }

    /// Send an unsolicited pong frame
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Pong).await
    }

    /// Initiate the close handshake
    ///
    /// Sends a close frame with the given payload, then keeps reading
    /// (discarding data frames) until the peer's close frame arrives or the
    /// stream ends. On return the connection is `Closed`. Calling `close`
    /// on a connection that is already closing or closed is a no-op.
    pub async fn close(&mut self, payload: &[u8]) -> Result<()> {
        if self.state != ReadyState::Open {
            return Ok(());
        }
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len() as u64));
        }

        debug!(role = ?self.role, "initiating close handshake");
        self.write_frame(OpCode::Close, payload, true).await?;
        self.state = ReadyState::Closing;

        let mut chunk = [0u8; READ_CHUNK];
        while self.state == ReadyState::Closing {
            let remaining = match &self.current {
                Some(f) => f.remaining(),
                None => {
                    if !self.begin_data_frame().await? {
                        break;
                    }
                    continue;
                }
            };
            if remaining == 0 {
                self.finish_current_frame();
                continue;
            }
            let want = remaining.min(chunk.len() as u64) as usize;
            let n = self.read_some(&mut chunk[..want]).await?;
            if let Some(f) = self.current.as_mut() {
                f.consumed += n as u64;
            }
        }
        Ok(())
    }

    /// Initiate the close handshake with a status code and reason
    pub async fn close_with(&mut self, code: u16, reason: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.close(&payload).await
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Read application payload into `buf`
    ///
    /// Fills the buffer from the message in progress, fetching continuation
    /// frames as needed and absorbing interleaved control frames. Returns
    /// the number of bytes written; the call returns early when the current
    /// message ends. `0` signals the end of a message (an empty final
    /// frame) or the end of the connection.
    pub async fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state == ReadyState::Closed || buf.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        loop {
            let (remaining, mask, consumed) = match &self.current {
                Some(f) => (f.remaining(), f.header.mask, f.consumed),
                None => {
                    if !self.begin_data_frame().await? {
                        return Ok(written);
                    }
                    continue;
                }
            };

            if remaining == 0 {
                if self.finish_current_frame() {
                    // Final frame fully consumed: the message is complete
                    return Ok(written);
                }
                continue;
            }
            if written == buf.len() {
                return Ok(written);
            }

            let want = remaining.min((buf.len() - written) as u64) as usize;
            let n = self.read_some(&mut buf[written..written + want]).await?;
            if let Some(key) = mask {
                apply_mask_offset(&mut buf[written..written + n], key, consumed as usize);
            }
            if let Some(f) = self.current.as_mut() {
                f.consumed += n as u64;
            }
            written += n;
        }
    }

    /// Read one complete message, capped at the configured
    /// `max_message_size`
    pub async fn recv_message(&mut self) -> Result<Message> {
        self.recv_message_limited(self.config.max_message_size).await
    }

    /// Read one complete message with an explicit size cap
    ///
    /// Fragments are assembled across frames; interleaved control frames
    /// are handled transparently (a close frame yields `Message::Close`).
    /// Fails with `MaxMessageSizeExceeded` as soon as the accumulated
    /// payload passes `max_size`; the connection is torn down in that case.
    pub async fn recv_message_limited(&mut self, max_size: usize) -> Result<Message> {
        if self.state == ReadyState::Closed {
            return Err(Error::Closed);
        }

        let mut assembled = BytesMut::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let (remaining, mask, consumed) = match &self.current {
                Some(f) => (f.remaining(), f.header.mask, f.consumed),
                None => {
                    if self.begin_data_frame().await? {
                        continue;
                    }
                    // Connection ended while assembling
                    if self.close_received {
                        return Ok(Message::Close(self.peer_close.clone()));
                    }
                    return Err(Error::ConnectionClosed);
                }
            };

            if remaining == 0 {
                let opcode = self.message_opcode;
                if self.finish_current_frame() {
                    let payload = assembled.freeze();
                    return match opcode {
                        Some(OpCode::Text) => {
                            if simdutf8::basic::from_utf8(&payload).is_err() {
                                Err(self.fatal(Error::InvalidUtf8).await)
                            } else {
                                Ok(Message::Text(payload))
                            }
                        }
                        _ => Ok(Message::Binary(payload)),
                    };
                }
                continue;
            }

            let want = remaining.min(chunk.len() as u64) as usize;
            if assembled.len() + want > max_size {
                let err = Error::MaxMessageSizeExceeded {
                    size: assembled.len() + want,
                    limit: max_size,
                };
                return Err(self.fatal(err).await);
            }

            let n = self.read_some(&mut chunk[..want]).await?;
            if let Some(key) = mask {
                apply_mask_offset(&mut chunk[..n], key, consumed as usize);
            }
            if let Some(f) = self.current.as_mut() {
                f.consumed += n as u64;
            }
            assembled.extend_from_slice(&chunk[..n]);
        }
    }

    // ========================================================================
    // Engine internals
    // ========================================================================

    /// Fetch the next data frame header, handling control frames inline
    ///
    /// Returns `false` when the connection reached `Closed` (close
    /// handshake completed or clean EOF) instead of producing a frame. On
    /// `true`, `self.current` holds the new frame.
    async fn begin_data_frame(&mut self) -> Result<bool> {
        loop {
            if self.state == ReadyState::Closed {
                return Ok(false);
            }

            let header = loop {
                match frame::parse_header(&mut self.read_buf, self.role.expect_masked()) {
                    Ok(Some(header)) => break header,
                    Ok(None) => {
                        self.read_buf.reserve(READ_CHUNK);
                        let n = match self.stream.read_buf(&mut self.read_buf).await {
                            Ok(n) => n,
                            Err(e) => return Err(self.fatal(e.into()).await),
                        };
                        if n == 0 {
                            if self.read_buf.is_empty() && self.message_opcode.is_none() {
                                // EOF on a frame boundary without a close
                                // handshake still releases the stream
                                self.transition_closed().await;
                                return Ok(false);
                            }
                            let err = Error::MalformedHeader("eof inside frame");
                            return Err(self.fatal(err).await);
                        }
                    }
                    Err(e) => return Err(self.fatal(e).await),
                }
            };

            if header.opcode.is_control() {
                self.handle_control(header).await?;
                continue;
            }

            match header.opcode {
                OpCode::Continuation if self.message_opcode.is_none() => {
                    let err = Error::Protocol("unexpected continuation frame");
                    return Err(self.fatal(err).await);
                }
                OpCode::Text | OpCode::Binary if self.message_opcode.is_some() => {
                    let err = Error::Protocol("expected continuation frame");
                    return Err(self.fatal(err).await);
                }
                _ => {}
            }

            if self.message_opcode.is_none() {
                self.message_opcode = Some(header.opcode);
            }
            self.current = Some(InboundFrame {
                header,
                consumed: 0,
            });
            return Ok(true);
        }
    }

    /// Clear a fully-consumed frame; returns true when it ended the message
    fn finish_current_frame(&mut self) -> bool {
        let fin = self
            .current
            .take()
            .map(|f| f.header.fin)
            .unwrap_or(false);
        if fin {
            self.message_opcode = None;
        }
        fin
    }

    /// Handle one control frame: read its payload and act on it
    async fn handle_control(&mut self, header: FrameHeader) -> Result<()> {
        let len = header.payload_len as usize;
        while self.read_buf.len() < len {
            self.read_buf.reserve(READ_CHUNK);
            let n = match self.stream.read_buf(&mut self.read_buf).await {
                Ok(n) => n,
                Err(e) => return Err(self.fatal(e.into()).await),
            };
            if n == 0 {
                let err = Error::MalformedHeader("eof inside control frame");
                return Err(self.fatal(err).await);
            }
        }

        let mut payload = self.read_buf.split_to(len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        match header.opcode {
            OpCode::Ping => {
                trace!(len, "ping received");
                if let Some(hook) = self.config.on_ping {
                    hook(&payload);
                }
                if self.state == ReadyState::Open {
                    self.write_frame(OpCode::Pong, &payload, true).await?;
                }
            }
            OpCode::Pong => {
                trace!(len, "pong received");
                if let Some(hook) = self.config.on_pong {
                    hook(&payload);
                }
            }
            OpCode::Close => {
                let reason = match parse_close_payload(&payload) {
                    Ok(reason) => reason,
                    Err(e) => return Err(self.fatal(e).await),
                };
                debug!(code = reason.as_ref().map(|r| r.code), "close frame received");
                self.close_received = true;
                self.peer_close = reason;

                match self.state {
                    ReadyState::Open => {
                        // Peer initiated: echo its close payload, then
                        // release the stream
                        self.write_frame(OpCode::Close, &payload, true).await?;
                        self.transition_closed().await;
                    }
                    ReadyState::Closing => {
                        // Our close was answered
                        self.transition_closed().await;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Read payload bytes into `out`, draining buffered bytes first
    async fn read_some(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.read_buf.is_empty() {
            let take = out.len().min(self.read_buf.len());
            out[..take].copy_from_slice(&self.read_buf[..take]);
            self.read_buf.advance(take);
            return Ok(take);
        }
        match self.stream.read(out).await {
            Ok(0) => Err(self.fatal(Error::ConnectionClosed).await),
            Ok(n) => Ok(n),
            Err(e) => Err(self.fatal(e.into()).await),
        }
    }

    /// Encode and write one frame, masking in the client role
    ///
    /// A cancelled write may have put part of a frame on the wire; the
    /// guard flag catches that on the next write and tears the connection
    /// down instead of interleaving garbage.
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8], fin: bool) -> Result<()> {
        if self.write_in_progress {
            let err = Error::Protocol("write cancelled mid-frame");
            return Err(self.fatal(err).await);
        }

        let mask = if self.role.masks_frames() {
            Some(generate_mask())
        } else {
            None
        };

        let mut buf = std::mem::take(&mut self.write_buf);
        buf.clear();
        frame::encode_frame(&mut buf, opcode, payload, fin, mask);

        self.write_in_progress = true;
        let result = match self.stream.write_all(&buf).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        self.write_in_progress = false;
        self.write_buf = buf;

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fatal(e.into()).await),
        }
    }

    /// Advance to `Closed` and release the stream
    async fn transition_closed(&mut self) {
        if self.state != ReadyState::Closed {
            self.state = ReadyState::Closed;
            let _ = self.stream.shutdown().await;
            debug!("connection closed");
        }
    }

    /// Terminal error path: close down, log, and hand the error back
    async fn fatal(&mut self, err: Error) -> Error {
        debug!(error = %err, "fatal connection error");
        self.transition_closed().await;
        err
    }

    // ========================================================================
    // Splitting
    // ========================================================================

    /// Split the connection into read and write halves
    ///
    /// The halves share the connection behind a mutex, so sends from one
    /// task never interleave with sends (or control echoes) from another.
    pub fn split(self) -> (ReadHalf<S>, WriteHalf<S>) {
        let shared = Arc::new(Mutex::new(self));
        (
            ReadHalf {
                shared: shared.clone(),
            },
            WriteHalf { shared },
        )
    }
}

/// Parse and validate a close frame payload
fn parse_close_payload(payload: &[u8]) -> Result<Option<CloseReason>> {
    if payload.is_empty() {
        return Ok(None);
    }
    if payload.len() == 1 {
        return Err(Error::Protocol("close payload of one byte"));
    }

    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !CloseReason::is_valid_code(code) {
        return Err(Error::InvalidCloseCode(code));
    }

    let reason = &payload[2..];
    if simdutf8::basic::from_utf8(reason).is_err() {
        return Err(Error::InvalidUtf8);
    }
    Ok(Some(CloseReason::new(
        code,
        String::from_utf8_lossy(reason).into_owned(),
    )))
}

/// The read half of a split connection
pub struct ReadHalf<S> {
    shared: Arc<Mutex<Connection<S>>>,
}

/// The write half of a split connection
pub struct WriteHalf<S> {
    shared: Arc<Mutex<Connection<S>>>,
}

impl<S> ReadHalf<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read one complete message
    pub async fn recv_message(&mut self) -> Result<Message> {
        self.shared.lock().await.recv_message().await
    }

    /// Read application payload into `buf`
    pub async fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.shared.lock().await.recv_into(buf).await
    }

    /// Current lifecycle state
    pub async fn ready_state(&self) -> ReadyState {
        self.shared.lock().await.ready_state()
    }
}

impl<S> WriteHalf<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a complete message
    pub async fn send(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        self.shared.lock().await.send(payload, opcode).await
    }

    /// Send a text message
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.shared.lock().await.send_text(text).await
    }

    /// Send a binary message
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.shared.lock().await.send_binary(data).await
    }

    /// Send a ping frame
    pub async fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        self.shared.lock().await.send_ping(payload).await
    }

    /// Initiate the close handshake
    pub async fn close(&mut self, payload: &[u8]) -> Result<()> {
        self.shared.lock().await.close(payload).await
    }
}

/// Reunite split halves into a connection
///
/// Fails when the halves come from different connections.
pub fn reunite<S>(
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
) -> std::result::Result<Connection<S>, ReuniteError<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !Arc::ptr_eq(&reader.shared, &writer.shared) {
        return Err(ReuniteError { reader, writer });
    }

    drop(reader);
    match Arc::try_unwrap(writer.shared) {
        Ok(mutex) => Ok(mutex.into_inner()),
        Err(arc) => {
            let reader = ReadHalf {
                shared: arc.clone(),
            };
            let writer = WriteHalf { shared: arc };
            Err(ReuniteError { reader, writer })
        }
    }
}

/// Error returned when trying to reunite halves of different connections
pub struct ReuniteError<S> {
    /// The reader half
    pub reader: ReadHalf<S>,
    /// The writer half
    pub writer: WriteHalf<S>,
}

impl<S> std::fmt::Debug for ReuniteError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReuniteError").finish_non_exhaustive()
    }
}

impl<S> std::fmt::Display for ReuniteError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tried to reunite halves from different connections")
    }
}

impl<S> std::error::Error for ReuniteError<S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::duplex;

    fn server_conn(
        stream: tokio::io::DuplexStream,
        config: Config,
    ) -> Connection<tokio::io::DuplexStream> {
        Connection::from_upgraded(stream, Role::Server, config)
    }

    /// Encode a masked frame the way a client peer would
    fn masked_frame(opcode: OpCode, payload: &[u8], fin: bool) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, opcode, payload, fin, Some([0x37, 0xfa, 0x21, 0x3d]));
        buf
    }

    #[tokio::test]
    async fn short_text_echo() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        peer.write_all(&masked_frame(OpCode::Text, b"Hello", true))
            .await
            .unwrap();

        let msg = conn.recv_message().await.unwrap();
        assert_eq!(msg, Message::text("Hello"));

        conn.send_text("Hello").await.unwrap();

        // The echo is a single unmasked frame with exact bytes
        let mut echoed = [0u8; 7];
        peer.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn send_fragments_at_max_frame_size() {
        let (client_io, mut peer) = duplex(64 * 1024);
        let config = Config::builder().max_frame_size(300).build();
        let mut conn = Connection::from_upgraded(client_io, Role::Client, config);

        let payload = vec![b'x'; 1000];
        conn.send(&payload, OpCode::Text).await.unwrap();
        drop(conn);

        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.unwrap();

        // Exactly four frames: Text, Continuation x3, lengths 300/300/300/100
        let mut buf = BytesMut::from(&wire[..]);
        let mut seen = Vec::new();
        let mut body = Vec::new();
        while !buf.is_empty() {
            let header = frame::parse_header(&mut buf, true).unwrap().unwrap();
            let len = header.payload_len as usize;
            let mut payload = buf.split_to(len);
            let key = header.mask.unwrap();
            apply_mask(&mut payload, key);
            body.extend_from_slice(&payload);
            seen.push((header.opcode, header.fin, len));
        }
        assert_eq!(
            seen,
            vec![
                (OpCode::Text, false, 300),
                (OpCode::Continuation, false, 300),
                (OpCode::Continuation, false, 300),
                (OpCode::Continuation, true, 100),
            ]
        );
        assert_eq!(body, payload);
    }

    static PING_SEEN: AtomicBool = AtomicBool::new(false);

    fn note_ping(_payload: &[u8]) {
        PING_SEEN.store(true, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn ping_between_fragments_is_answered_first() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let config = Config::builder().on_ping(note_ping).build();
        let mut conn = server_conn(server_io, config);

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&masked_frame(OpCode::Binary, b"first", false));
        wire.extend_from_slice(&masked_frame(OpCode::Ping, b"hi", true));
        wire.extend_from_slice(&masked_frame(OpCode::Continuation, b"second", true));
        peer.write_all(&wire).await.unwrap();

        let msg = conn.recv_message().await.unwrap();
        assert_eq!(msg.as_bytes(), b"firstsecond");
        assert!(PING_SEEN.load(Ordering::SeqCst));

        // The pong echo was written before the second fragment was consumed
        let mut pong = [0u8; 4];
        peer.read_exact(&mut pong).await.unwrap();
        assert_eq!(&pong, &[0x8A, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn recv_into_streams_across_fragments() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        let payload: Vec<u8> = (0..=255u8).cycle().take(600).collect();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&masked_frame(OpCode::Binary, &payload[..250], false));
        wire.extend_from_slice(&masked_frame(OpCode::Continuation, &payload[250..], true));
        peer.write_all(&wire).await.unwrap();

        // Drain through a deliberately small, oddly-sized buffer so the
        // resumable mask offset is exercised on every chunk
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = conn.recv_into(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            if out.len() == payload.len() {
                // Message boundary: the next call must report it with 0
                // only if the final frame is already drained; a full read
                // of exactly the message length ends here
                break;
            }
        }
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn recv_into_reports_message_end() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        peer.write_all(&masked_frame(OpCode::Text, b"ab", true))
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = conn.recv_into(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ab");
        assert_eq!(n, 2);

        // Empty final frame signals its message end with a zero read
        peer.write_all(&masked_frame(OpCode::Text, b"", true))
            .await
            .unwrap();
        let n = conn.recv_into(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn peer_initiated_close_is_echoed() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        let mut payload = Vec::new();
        payload.extend_from_slice(&1000u16.to_be_bytes());
        payload.extend_from_slice(b"bye");
        peer.write_all(&masked_frame(OpCode::Close, &payload, true))
            .await
            .unwrap();

        let msg = conn.recv_message().await.unwrap();
        assert_eq!(msg, Message::Close(Some(CloseReason::new(1000, "bye"))));
        assert_eq!(conn.ready_state(), ReadyState::Closed);

        // The close echo carries the peer's payload back, unmasked
        let mut echoed = [0u8; 7];
        peer.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed[0], 0x88);
        assert_eq!(echoed[1], 0x05);
        assert_eq!(&echoed[2..4], &1000u16.to_be_bytes());
        assert_eq!(&echoed[4..], b"bye");

        // Closed is terminal
        assert!(matches!(
            conn.send_text("more").await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn local_close_completes_handshake() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        // The peer's answering close is already in flight
        peer.write_all(&masked_frame(OpCode::Close, &1000u16.to_be_bytes(), true))
            .await
            .unwrap();

        conn.close(&[]).await.unwrap();
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert_eq!(conn.peer_close_reason().map(|r| r.code), Some(1000));

        // Our close frame went out before the state advanced
        let mut sent = [0u8; 2];
        peer.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, &[0x88, 0x00]);

        assert!(matches!(conn.send_text("x").await, Err(Error::Closed)));
        // close is idempotent once closing has begun
        conn.close(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn oversize_message_is_rejected() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let config = Config::builder().max_message_size(1024).build();
        let mut conn = server_conn(server_io, config);

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&masked_frame(OpCode::Binary, &[0u8; 800], false));
        wire.extend_from_slice(&masked_frame(OpCode::Continuation, &[0u8; 800], false));
        wire.extend_from_slice(&masked_frame(OpCode::Continuation, &[0u8; 400], true));
        peer.write_all(&wire).await.unwrap();

        let err = conn.recv_message().await.unwrap_err();
        assert!(matches!(err, Error::MaxMessageSizeExceeded { .. }));
        assert_eq!(conn.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn rsv_bit_is_fatal() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        // FIN + RSV1 + Text, masked, empty payload
        peer.write_all(&[0xC1, 0x80, 0, 0, 0, 0]).await.unwrap();

        let err = conn.recv_message().await.unwrap_err();
        assert!(matches!(err, Error::RsvMismatch));
        assert_eq!(conn.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn unmasked_client_frame_is_fatal() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        peer.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();

        let err = conn.recv_message().await.unwrap_err();
        assert!(matches!(err, Error::MaskMismatch(_)));
    }

    #[tokio::test]
    async fn continuation_without_start_is_fatal() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        peer.write_all(&masked_frame(OpCode::Continuation, b"x", true))
            .await
            .unwrap();

        let err = conn.recv_message().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_text_is_fatal() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());

        peer.write_all(&masked_frame(OpCode::Text, &[0xff, 0xfe], true))
            .await
            .unwrap();

        let err = conn.recv_message().await.unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8));
    }

    #[tokio::test]
    async fn split_halves_cooperate() {
        let (server_io, mut peer) = duplex(64 * 1024);
        let conn = server_conn(server_io, Config::default());
        let (mut reader, mut writer) = conn.split();

        writer.send_text("from-writer").await.unwrap();

        let mut frame_bytes = [0u8; 13];
        peer.read_exact(&mut frame_bytes).await.unwrap();
        assert_eq!(&frame_bytes[2..], b"from-writer");

        peer.write_all(&masked_frame(OpCode::Text, b"to-reader", true))
            .await
            .unwrap();
        let msg = reader.recv_message().await.unwrap();
        assert_eq!(msg, Message::text("to-reader"));

        let conn = reunite(reader, writer).unwrap();
        assert_eq!(conn.ready_state(), ReadyState::Open);
    }

    #[tokio::test]
    async fn eof_without_close_surfaces_as_closed_connection() {
        let (server_io, peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());
        drop(peer);

        let err = conn.recv_message().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));

        // recv_into signals the same condition with a zero read
        let (server_io, peer) = duplex(64 * 1024);
        let mut conn = server_conn(server_io, Config::default());
        drop(peer);
        let mut buf = [0u8; 8];
        assert_eq!(conn.recv_into(&mut buf).await.unwrap(), 0);
        assert_eq!(conn.ready_state(), ReadyState::Closed);
    }
}
