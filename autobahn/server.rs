//! Standalone echo server for the Autobahn conformance suite
//!
//! Echoes every text and binary message back to the client. Run the
//! fuzzingclient against ws://127.0.0.1:9001.

use std::net::SocketAddr;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use riptide_ws::error::Result;
use riptide_ws::protocol::Message;
use riptide_ws::{server, Config, OpCode};

#[tokio::main]
async fn main() -> Result<()> {
    let addr: SocketAddr = "127.0.0.1:9001".parse().expect("valid address");

    // SO_REUSEPORT lets parallel server processes share the port
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))
        .expect("failed to create socket");
    socket.set_reuse_address(true).expect("set_reuse_address");
    #[cfg(unix)]
    socket.set_reuse_port(true).expect("set_reuse_port");
    socket.set_nonblocking(true).expect("set_nonblocking");
    socket.bind(&addr.into()).expect("bind");
    socket.listen(1024).expect("listen");

    let listener = TcpListener::from_std(socket.into()).expect("from_std");

    println!("WebSocket echo server listening on ws://{}", addr);
    println!("Ready for Autobahn test suite");

    loop {
        let (stream, _peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();

        tokio::spawn(async move {
            let _ = handle_connection(stream).await;
        });
    }
}

async fn handle_connection(stream: TcpStream) -> Result<()> {
    // Autobahn drives large messages; raise the caps well past its cases
    let config = Config::builder()
        .max_frame_size(16 * 1024 * 1024)
        .max_message_size(64 * 1024 * 1024)
        .build();

    let mut conn = server::accept(stream, config).await?;

    loop {
        match conn.recv_message().await? {
            Message::Text(text) => conn.send(&text, OpCode::Text).await?,
            Message::Binary(data) => conn.send_binary(&data).await?,
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
}
