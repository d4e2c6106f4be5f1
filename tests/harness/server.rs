//! Server side of a test connection, over an in-memory pipe or TCP.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wsclient::protocol::handshake::find_header_end;
use wsclient::protocol::{Frame, MaskingKey, OpCode, compute_accept_key};
use wsclient::{ConnectionOptions, Error, WebSocketClient};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Server end of a connection.
pub struct ServerSide<S> {
    io: S,
    buf: BytesMut,
    /// Raw handshake request the client sent.
    pub request: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServerSide<S> {
    /// Read the upgrade request and answer `101` with a correct accept key.
    pub async fn accept(io: S) -> Self {
        Self::accept_with(io, &[], &[]).await
    }

    /// Like [`accept`](Self::accept), adding `headers` to the response and
    /// sending `trailing` in the same write right behind it.
    pub async fn accept_with(io: S, headers: &[&str], trailing: &[u8]) -> Self {
        let mut server = Self::read_request(io).await;
        let key = server
            .header("sec-websocket-key")
            .expect("request without Sec-WebSocket-Key");
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            compute_accept_key(&key)
        );
        for header in headers {
            response.push_str(header);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");

        let mut bytes = response.into_bytes();
        bytes.extend_from_slice(trailing);
        server.send_raw(&bytes).await;
        server
    }

    /// Read the upgrade request without answering it.
    pub async fn read_request(mut io: S) -> Self {
        let mut buf = BytesMut::new();
        let end = loop {
            if let Some(end) = find_header_end(&buf) {
                break end;
            }
            let n = io.read_buf(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up during handshake");
        };
        let head = buf.split_to(end);
        Self {
            io,
            buf,
            request: String::from_utf8(head.to_vec()).unwrap(),
        }
    }

    /// Value of a request header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        self.request.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
        self.io.flush().await.unwrap();
    }

    pub async fn send(&mut self, frame: Frame) {
        self.send_raw(&frame.encode()).await;
    }

    /// Send without panicking when the client already hung up.
    async fn try_send(&mut self, frame: Frame) -> bool {
        self.io.write_all(&frame.encode()).await.is_ok() && self.io.flush().await.is_ok()
    }

    /// Next frame from the client, or `None` once it hung up.
    ///
    /// Panics if the frame is not masked.
    pub async fn read_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(STEP_TIMEOUT, self.next_frame())
            .await
            .expect("timed out waiting for a client frame")
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match Frame::parse(&self.buf) {
                Ok((frame, consumed)) => {
                    self.buf.advance(consumed);
                    assert_ne!(frame.masking_key, MaskingKey::NoMasking, "client frame not masked");
                    return Some(frame);
                }
                Err(Error::IncompleteFrame { .. }) => {}
                Err(e) => panic!("client sent a bad frame: {e}"),
            }
            match self.io.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Read a Close frame and return its code.
    pub async fn read_close(&mut self) -> (u16, String) {
        let frame = self.read_frame().await.expect("expected a close frame");
        assert_eq!(frame.opcode, OpCode::Close);
        let payload = frame.payload();
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        (code, String::from_utf8(payload[2..].to_vec()).unwrap())
    }
}

/// A client connected to a scripted server over an in-memory pipe.
pub async fn connected_pair() -> (WebSocketClient, ServerSide<DuplexStream>) {
    connected_pair_with(ConnectionOptions::new("example.com")).await
}

pub async fn connected_pair_with(
    options: ConnectionOptions,
) -> (WebSocketClient, ServerSide<DuplexStream>) {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let client = WebSocketClient::new(options);
    let (connected, server) =
        tokio::join!(client.connect_stream(client_io), ServerSide::accept(server_io));
    connected.unwrap();
    (client, server)
}

/// TCP echo server: text and binary messages come back as sent, Close is
/// echoed and ends the connection.
pub struct TestServer {
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_on(TcpListener::bind("127.0.0.1:0").await.unwrap())
    }

    pub fn spawn_on(listener: TcpListener) -> (Self, SocketAddr) {
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(echo(stream));
            }
        });
        (Self { task }, addr)
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn echo<S: AsyncRead + AsyncWrite + Unpin>(io: S) {
    let mut server = ServerSide::accept(io).await;
    while let Some(frame) = server.next_frame().await {
        let reply = match frame.opcode {
            OpCode::Close => {
                server.try_send(Frame::new(true, OpCode::Close, frame.into_payload())).await;
                return;
            }
            OpCode::Ping => Frame::pong(frame.into_payload()),
            OpCode::Pong => continue,
            opcode => Frame::new(frame.fin, opcode, frame.into_payload()),
        };
        if !server.try_send(reply).await {
            return;
        }
    }
}
