//! End-to-end client behavior against a scripted server.

mod harness;

use std::time::Duration;

use harness::{ServerSide, connected_pair, connected_pair_with};
use tokio::sync::{broadcast, watch};
use wsclient::protocol::{Frame, MaskingKey, OpCode};
use wsclient::{
    CloseCode, CloseFrame, ConnectionOptions, ConnectionState, Error, WebSocketClient,
    WebSocketMessage,
};

async fn next_message(rx: &mut broadcast::Receiver<WebSocketMessage>) -> WebSocketMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("message channel closed")
}

async fn wait_disconnected(rx: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(ConnectionState::is_terminal))
        .await
        .expect("timed out waiting for disconnect")
        .unwrap()
        .clone()
}

fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}

#[tokio::test]
async fn test_handshake_request_layout() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let options = ConnectionOptions::new("example.com")
        .with_port(8080)
        .with_endpoint("/chat")
        .with_protocol("chat")
        .with_protocol("superchat");
    let client = WebSocketClient::new(options);

    let (connected, server) = tokio::join!(
        client.connect_stream(client_io),
        ServerSide::accept_with(server_io, &["Sec-WebSocket-Protocol: chat"], &[])
    );
    connected.unwrap();

    let lines: Vec<&str> = server.request.lines().collect();
    assert_eq!(lines[0], "GET /chat HTTP/1.1");
    assert_eq!(lines[1], "Host: example.com:8080");
    assert_eq!(lines[2], "Connection: Upgrade");
    assert_eq!(lines[3], "Upgrade: websocket");
    assert_eq!(lines[4], "Sec-WebSocket-Protocol: chat");
    assert_eq!(lines[5], "Sec-WebSocket-Protocol: superchat");
    assert_eq!(lines[6], "Sec-WebSocket-Version: 13");
    assert!(lines[7].starts_with("Sec-WebSocket-Key: "));
    assert_eq!(server.header("sec-websocket-key").unwrap().len(), 24);

    assert!(client.is_open());
    assert_eq!(client.protocol(), Some("chat"));
}

#[tokio::test]
async fn test_echo_text() {
    let (client, mut server) = connected_pair().await;
    let mut messages = client.incoming_messages();

    client.write_text("hello").await.unwrap();
    let frame = server.read_frame().await.unwrap();
    assert!(frame.fin);
    assert_eq!(frame.opcode, OpCode::Text);
    assert_eq!(frame.payload(), b"hello");

    server.send(Frame::text(b"hello".to_vec())).await;
    assert_eq!(next_message(&mut messages).await, WebSocketMessage::text("hello"));
}

#[tokio::test]
async fn test_large_binary_uses_64bit_length() {
    let (client, mut server) = connected_pair().await;
    let mut messages = client.incoming_messages();
    let data: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();

    client.write_binary(data.clone()).await.unwrap();
    let frame = server.read_frame().await.unwrap();
    assert_eq!(frame.length_field(), 127);
    assert_eq!(frame.payload(), data.as_slice());

    server.send(Frame::binary(data.clone())).await;
    assert_eq!(next_message(&mut messages).await, WebSocketMessage::Binary(data));
}

#[tokio::test]
async fn test_outgoing_fragmentation() {
    let options = ConnectionOptions::new("example.com").with_fragment_size(4);
    let (client, mut server) = connected_pair_with(options).await;

    client.write_text("hello world").await.unwrap();
    let frames = [
        server.read_frame().await.unwrap(),
        server.read_frame().await.unwrap(),
        server.read_frame().await.unwrap(),
    ];
    assert_eq!(frames[0].opcode, OpCode::Text);
    assert_eq!(frames[1].opcode, OpCode::Continuation);
    assert_eq!(frames[2].opcode, OpCode::Continuation);
    assert_eq!([frames[0].fin, frames[1].fin, frames[2].fin], [false, false, true]);

    let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload().to_vec()).collect();
    assert_eq!(joined, b"hello world");
}

#[tokio::test]
async fn test_ping_between_fragments() {
    let (client, mut server) = connected_pair().await;
    let mut messages = client.incoming_messages();

    server.send(Frame::new(false, OpCode::Text, b"Hel".to_vec())).await;
    server.send(Frame::ping(b"p".to_vec())).await;

    // The pong arrives while the text message is still incomplete.
    let pong = server.read_frame().await.unwrap();
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload(), b"p");

    assert_eq!(messages.try_recv(), Ok(WebSocketMessage::Ping(b"p".to_vec())));
    assert_eq!(messages.try_recv(), Err(broadcast::error::TryRecvError::Empty));

    server.send(Frame::new(true, OpCode::Continuation, b"lo".to_vec())).await;
    assert_eq!(next_message(&mut messages).await, WebSocketMessage::text("Hello"));
    assert!(client.is_open());
}

#[tokio::test]
async fn test_pipelined_frame_after_handshake() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let client = WebSocketClient::new(ConnectionOptions::new("example.com"));
    let mut messages = client.incoming_messages();

    let early = Frame::text(b"early".to_vec()).encode();
    let (connected, _server) = tokio::join!(
        client.connect_stream(client_io),
        ServerSide::accept_with(server_io, &[], &early)
    );
    connected.unwrap();

    assert_eq!(next_message(&mut messages).await, WebSocketMessage::text("early"));
}

#[tokio::test]
async fn test_every_subscriber_sees_every_message() {
    let (client, mut server) = connected_pair().await;
    let mut first = client.incoming_messages();
    let mut second = client.incoming_messages();

    server.send(Frame::text(b"one".to_vec())).await;
    server.send(Frame::binary(vec![2])).await;

    for rx in [&mut first, &mut second] {
        assert_eq!(next_message(rx).await, WebSocketMessage::text("one"));
        assert_eq!(next_message(rx).await, WebSocketMessage::Binary(vec![2]));
    }
}

async fn expect_failure(frame_bytes: &[u8], code: u16) -> ConnectionState {
    let (client, mut server) = connected_pair().await;
    let mut state = client.connection_state();

    server.send_raw(frame_bytes).await;
    let (sent, _) = server.read_close().await;
    assert_eq!(sent, code);
    assert!(server.read_frame().await.is_none(), "transport should be released");

    let state = wait_disconnected(&mut state).await;
    let disconnect = state.disconnect().unwrap();
    assert_eq!(disconnect.code, Some(CloseCode::from_u16(code)));
    state
}

#[tokio::test]
async fn test_reserved_bits_close_1002() {
    let state = expect_failure(&[0xC1, 0x00], 1002).await;
    assert_eq!(state.disconnect().unwrap().cause, Some(Error::ReservedBitsSet));
}

#[tokio::test]
async fn test_invalid_utf8_close_1007() {
    let state = expect_failure(&Frame::text(vec![0x80]).encode(), 1007).await;
    assert_eq!(state.disconnect().unwrap().cause, Some(Error::InvalidUtf8));
}

#[tokio::test]
async fn test_masked_server_frame_close_1002() {
    let masked = Frame::text(b"x".to_vec()).masked(MaskingKey::from([1, 2, 3, 4]));
    let state = expect_failure(&masked.encode(), 1002).await;
    assert_eq!(state.disconnect().unwrap().cause, Some(Error::MaskedServerFrame));
}

#[tokio::test]
async fn test_reserved_opcode_close_1002() {
    expect_failure(&[0x83, 0x00], 1002).await;
}

#[tokio::test]
async fn test_unexpected_continuation_close_1002() {
    expect_failure(&[0x80, 0x00], 1002).await;
}

#[tokio::test]
async fn test_oversized_ping_close_1002() {
    let mut bytes = vec![0x89, 0x7E, 0x00, 0x7E];
    bytes.extend(vec![0u8; 126]);
    expect_failure(&bytes, 1002).await;
}

#[tokio::test]
async fn test_frame_over_limit_close_1009() {
    let limits = wsclient::Limits::new(16, 1024, 16, 8192);
    let options = ConnectionOptions::new("example.com").with_limits(limits);
    let (client, mut server) = connected_pair_with(options).await;
    let mut state = client.connection_state();

    server.send(Frame::binary(vec![0; 17])).await;
    assert_eq!(server.read_close().await.0, 1009);
    let state = wait_disconnected(&mut state).await;
    assert_eq!(state.disconnect().unwrap().code, Some(CloseCode::MessageTooBig));
}

#[tokio::test]
async fn test_invalid_peer_close_codes() {
    for code in [0u16, 999, 1004, 1005, 1006, 1016, 2999, 5000] {
        let (client, mut server) = connected_pair().await;
        let mut state = client.connection_state();

        server.send(Frame::close(Some(code), "")).await;
        let (reply, reason) = server.read_close().await;
        assert_eq!(reply, 1002, "code {code}");
        assert_eq!(reason, format!("Invalid Server close code {code}"));

        let state = wait_disconnected(&mut state).await;
        assert_eq!(state.disconnect().unwrap().code, Some(CloseCode::ProtocolError));
    }
}

#[tokio::test]
async fn test_valid_peer_close_codes_echoed() {
    for code in [1000u16, 1001, 1011, 3000, 4999] {
        let (client, mut server) = connected_pair().await;
        let mut messages = client.incoming_messages();
        let mut state = client.connection_state();

        server.send(Frame::close(Some(code), "done")).await;
        assert_eq!(server.read_close().await, (code, "done".to_string()));

        assert_eq!(
            next_message(&mut messages).await,
            WebSocketMessage::Close(CloseFrame::new(CloseCode::from_u16(code), "done"))
        );
        let state = wait_disconnected(&mut state).await;
        assert_eq!(state.disconnect().unwrap().code, Some(CloseCode::from_u16(code)));
        assert!(state.disconnect().unwrap().cause.is_none());
    }
}

#[tokio::test]
async fn test_one_byte_close_payload() {
    let (_client, mut server) = connected_pair().await;
    server.send(Frame::new(true, OpCode::Close, vec![0x03])).await;
    assert_eq!(
        server.read_close().await,
        (1002, "Invalid close payload length (1)".to_string())
    );
}

#[tokio::test]
async fn test_close_reason_invalid_utf8() {
    let (_client, mut server) = connected_pair().await;
    let mut payload = close_payload(1000, "");
    payload.push(0xFF);
    server.send(Frame::new(true, OpCode::Close, payload)).await;
    assert_eq!(
        server.read_close().await,
        (1002, "Invalid UTF-8 Message in payload".to_string())
    );
}

#[tokio::test]
async fn test_empty_peer_close_replies_1000() {
    let (client, mut server) = connected_pair().await;
    let mut messages = client.incoming_messages();

    server.send(Frame::new(true, OpCode::Close, Vec::new())).await;
    let reply = server.read_frame().await.unwrap();
    assert_eq!(reply.opcode, OpCode::Close);
    assert_eq!(reply.payload(), &[0x03, 0xE8]);

    assert_eq!(
        next_message(&mut messages).await,
        WebSocketMessage::Close(CloseFrame::new(CloseCode::NoStatusReceived, ""))
    );
}

#[tokio::test]
async fn test_peer_close_answered_once() {
    let (client, mut server) = connected_pair().await;
    let mut state = client.connection_state();

    server.send(Frame::close(Some(1000), "bye")).await;
    assert_eq!(server.read_close().await, (1000, "bye".to_string()));

    let state = wait_disconnected(&mut state).await;
    assert_eq!(state.to_string(), "Disconnected(1000)");

    client.close(CloseCode::Normal, "").await.unwrap();
    assert!(server.read_frame().await.is_none());
    assert_eq!(client.write_text("late").await, Err(Error::ConnectionClosed(None)));
}

#[tokio::test]
async fn test_client_close() {
    let (client, mut server) = connected_pair().await;

    let closing = tokio::spawn({
        let state = client.connection_state();
        async move {
            let mut state = state;
            wait_disconnected(&mut state).await
        }
    });
    client.close(CloseCode::GoingAway, "shutting down").await.unwrap();
    assert_eq!(server.read_close().await, (1001, "shutting down".to_string()));
    assert!(server.read_frame().await.is_none());

    let state = closing.await.unwrap();
    assert_eq!(state.disconnect().unwrap().code, Some(CloseCode::GoingAway));

    // A second close sends nothing.
    client.close(CloseCode::Normal, "").await.unwrap();
    assert_eq!(client.write_text("late").await, Err(Error::ConnectionClosed(None)));
}

#[tokio::test]
async fn test_close_reason_truncated() {
    let (client, mut server) = connected_pair().await;
    let reason = "x".repeat(200);
    client.close(CloseCode::Normal, &reason).await.unwrap();
    let (_, sent) = server.read_close().await;
    assert_eq!(sent.len(), 123);
}

#[tokio::test]
async fn test_connect_twice_is_noop() {
    let (client, mut server) = connected_pair().await;
    let (other, _unused) = tokio::io::duplex(64);
    client.connect_stream(other).await.unwrap();
    assert!(client.is_open());

    client.write_text("still here").await.unwrap();
    assert_eq!(server.read_frame().await.unwrap().payload(), b"still here");
}

#[tokio::test]
async fn test_connect_after_disconnect_fails() {
    let (client, _server) = connected_pair().await;
    client.close(CloseCode::Normal, "").await.unwrap();

    let (other, _unused) = tokio::io::duplex(64);
    assert_eq!(
        client.connect_stream(other).await,
        Err(Error::ConnectionClosed(Some(1000)))
    );
}

#[tokio::test]
async fn test_handshake_rejected() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let client = WebSocketClient::new(ConnectionOptions::new("example.com"));

    let (connected, _server) = tokio::join!(client.connect_stream(client_io), async {
        let mut server = ServerSide::read_request(server_io).await;
        server.send_raw(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        server
    });

    assert!(matches!(connected, Err(Error::InvalidHandshake(_))));
    let state = client.state();
    let disconnect = state.disconnect().unwrap();
    assert!(matches!(disconnect.cause, Some(Error::InvalidHandshake(_))));
    assert_eq!(disconnect.code, None);
}

#[tokio::test]
async fn test_strict_accept_verification() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let client =
        WebSocketClient::new(ConnectionOptions::new("example.com").with_verify_accept(true));

    let (connected, _server) = tokio::join!(client.connect_stream(client_io), async {
        let mut server = ServerSide::read_request(server_io).await;
        server
            .send_raw(
                b"HTTP/1.1 101 Switching Protocols\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Accept: bm90IHRoZSByaWdodCBrZXk=\r\n\r\n",
            )
            .await;
        server
    });

    assert!(matches!(connected, Err(Error::InvalidHandshake(_))));
    assert!(client.state().is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let (client_io, _server_io) = tokio::io::duplex(4096);
    let options = ConnectionOptions::new("example.com")
        .with_timeouts(wsclient::Timeouts::uniform(Duration::from_secs(1)));
    let client = WebSocketClient::new(options);

    assert_eq!(
        client.connect_stream(client_io).await,
        Err(Error::Timeout("handshake response"))
    );
}

#[tokio::test]
async fn test_server_hangup_disconnects_without_code() {
    let (client, server) = connected_pair().await;
    let mut state = client.connection_state();
    drop(server);

    let state = wait_disconnected(&mut state).await;
    let disconnect = state.disconnect().unwrap();
    assert_eq!(disconnect.code, None);
    assert_eq!(disconnect.cause, Some(Error::ConnectionClosed(None)));
}
