use std::future::Future;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, debug_span, trace, warn};

use crate::config::{ConnectionOptions, Limits};
use crate::connection::codec::{FrameReader, FrameWriter};
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::state::{ConnectionState, Disconnect, StateCell};
use crate::connection::transport::{
    BoxedTransport, Connector, DefaultConnector, Socket, Transport, next_connection_id,
};
use crate::error::{Error, Result};
use crate::message::{CloseCode, WebSocketMessage};
use crate::protocol::close::{PeerClose, close_payload};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::handshake::{HandshakeRequest, HandshakeResponse, find_header_end};
use crate::protocol::{Frame, MessageAssembler, OpCode};

/// Depth of the outgoing frame queue before `send` waits.
const OUTGOING_QUEUE: usize = 64;

/// Frames for one queued message and where to report the write result.
struct Outgoing {
    frames: Vec<Frame>,
    ack: oneshot::Sender<Result<()>>,
}

/// Set once the handshake succeeded.
#[derive(Debug, Clone, Default)]
struct Session {
    protocol: Option<String>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

/// Handles that keep the connection's I/O alive.
#[derive(Default)]
struct Io {
    outgoing: Option<mpsc::Sender<Outgoing>>,
    tasks: Vec<JoinHandle<()>>,
    released: bool,
}

struct Inner {
    options: ConnectionOptions,
    state: StateCell,
    incoming: broadcast::Sender<WebSocketMessage>,
    io: Mutex<Io>,
    session: OnceLock<Session>,
    /// The server started the close handshake; no Close frame may follow ours.
    peer_closed: AtomicBool,
    /// A Close frame has been queued or skipped; no other may follow.
    closing: AtomicBool,
}

/// A WebSocket client connection.
///
/// Created in [`ConnectionState::Initialized`]; subscribe to
/// [`incoming_messages`](Self::incoming_messages) and
/// [`connection_state`](Self::connection_state) before connecting to see
/// everything. Once connected, a reader task turns incoming frames into
/// messages and a writer task drains the outgoing queue in order.
///
/// ```rust,no_run
/// use wsclient::{ConnectionOptions, WebSocketClient, WebSocketMessage, CloseCode};
///
/// # async fn run() -> wsclient::Result<()> {
/// let client = WebSocketClient::new(ConnectionOptions::from_url("ws://localhost:9001/")?);
/// let mut messages = client.incoming_messages();
/// client.connect().await?;
/// client.write_text("hello").await?;
/// if let Ok(WebSocketMessage::Text(reply)) = messages.recv().await {
///     println!("{reply}");
/// }
/// client.close(CloseCode::Normal, "").await?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketClient {
    inner: Arc<Inner>,
}

impl WebSocketClient {
    #[must_use]
    pub fn new(options: ConnectionOptions) -> Self {
        let (incoming, _) = broadcast::channel(options.message_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                options,
                state: StateCell::new(),
                incoming,
                io: Mutex::new(Io::default()),
                session: OnceLock::new(),
                peer_closed: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Open the transport (TCP, or TLS when `options.tls`) and run the handshake.
    ///
    /// A no-op while already connecting or connected.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` once the client is disconnected
    /// - `Error::Timeout` when opening or the handshake takes too long
    /// - `Error::InvalidHandshake` for a bad `101` response
    /// - `Error::Io` / `Error::Tls` for transport failures
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(DefaultConnector).await
    }

    /// Like [`connect`](Self::connect) with a custom connector.
    ///
    /// # Errors
    /// See [`connect`](Self::connect).
    pub async fn connect_with<C: Connector>(&self, connector: C) -> Result<()> {
        let options = &self.inner.options;
        self.establish(async move {
            timeout(options.timeouts.connect, connector.connect(options))
                .await
                .map_err(|_| Error::Timeout("connect"))?
        })
        .await
    }

    /// Run the handshake over an already open stream.
    ///
    /// # Errors
    /// See [`connect`](Self::connect).
    pub async fn connect_stream<T: Transport>(&self, stream: T) -> Result<()> {
        self.establish(async move { Ok(Socket::new(stream)) }).await
    }

    async fn establish<F>(&self, open: F) -> Result<()>
    where
        F: Future<Output = Result<Socket>>,
    {
        match self.inner.state.begin_connect() {
            Ok(()) => {}
            Err(ConnectionState::Disconnected(d)) => {
                return Err(Error::ConnectionClosed(d.code.map(|c| c.as_u16())));
            }
            Err(_) => return Ok(()),
        }

        let options = &self.inner.options;
        let id = next_connection_id(&options.host, options.port);
        let span = debug_span!(
            "websocket",
            connection = %format!("#{id} {}:{}", options.host, options.port)
        );

        let result = async {
            debug!(url = %options.url(), "connecting");
            let socket = open.await?;
            start(&self.inner, socket, span.clone()).await
        }
        .instrument(span.clone())
        .await;

        if let Err(e) = &result {
            let _enter = span.enter();
            debug!(error = %e, "connect failed");
            self.inner.state.disconnect(Disconnect::error(e.clone()));
        }
        result
    }

    /// Queue a message and wait until it has been written.
    ///
    /// Text and binary messages are split into continuation frames when
    /// `fragment_size` is set. Sending `Close` is the same as calling
    /// [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` unless connected
    /// - `Error::MessageTooLarge` above `limits.max_message_size`
    /// - `Error::ControlFrameTooLarge` for Ping/Pong payloads over 125 bytes
    /// - `Error::Timeout` / `Error::Io` from the write
    pub async fn send(&self, message: WebSocketMessage) -> Result<()> {
        let frames = match message {
            WebSocketMessage::Close(frame) => return self.close(frame.code, &frame.reason).await,
            WebSocketMessage::Text(text) => self.data_frames(OpCode::Text, text.into_bytes())?,
            WebSocketMessage::Binary(data) => self.data_frames(OpCode::Binary, data)?,
            WebSocketMessage::Ping(data) => vec![control_frame(OpCode::Ping, data)?],
            WebSocketMessage::Pong(data) => vec![control_frame(OpCode::Pong, data)?],
        };

        if !self.inner.state.get().is_connected() {
            return Err(Error::ConnectionClosed(None));
        }
        self.inner.enqueue(frames).await
    }

    fn data_frames(&self, opcode: OpCode, payload: Vec<u8>) -> Result<Vec<Frame>> {
        self.inner.options.limits.check_message_size(payload.len())?;
        Ok(MessageFragmenter::new(payload, opcode, self.inner.options.fragment_size).collect())
    }

    /// # Errors
    /// See [`send`](Self::send).
    pub async fn write_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(WebSocketMessage::Text(text.into())).await
    }

    /// # Errors
    /// See [`send`](Self::send).
    pub async fn write_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(WebSocketMessage::Binary(data.into())).await
    }

    /// # Errors
    /// See [`send`](Self::send).
    pub async fn ping(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(WebSocketMessage::Ping(data.into())).await
    }

    /// Send an unsolicited Pong.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn pong(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(WebSocketMessage::Pong(data.into())).await
    }

    /// Close the connection.
    ///
    /// Sends a Close frame with `code` and `reason` unless the server already
    /// started the close handshake, then releases the transport and rejects
    /// further sends. Calling it again, or after the connection ended, does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCloseCode` for codes an endpoint may not send.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        let payload = close_payload(code, reason)?;
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let was_connected = self.inner.state.get().is_connected();
        self.inner.state.disconnect(Disconnect::closed(code, reason));
        if was_connected {
            debug!(%code, reason, "sending close");
            if let Err(e) = self.inner.enqueue(vec![Frame::new(true, OpCode::Close, payload)]).await {
                debug!(error = %e, "close frame not written");
            }
        }

        self.inner.release();
        Ok(())
    }

    /// Subscribe to incoming messages.
    ///
    /// Every subscriber sees every message from the moment it subscribed.
    /// A subscriber more than `message_buffer` messages behind gets
    /// `RecvError::Lagged`.
    #[must_use]
    pub fn incoming_messages(&self) -> broadcast::Receiver<WebSocketMessage> {
        self.inner.incoming.subscribe()
    }

    /// Watch the connection state.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.get().is_connected()
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Subprotocol selected by the server.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.inner.session.get()?.protocol.as_deref()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.session.get()?.local_addr
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.session.get()?.peer_addr
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("url", &self.inner.options.url())
            .field("state", &self.inner.state.get())
            .finish_non_exhaustive()
    }
}

fn control_frame(opcode: OpCode, payload: Vec<u8>) -> Result<Frame> {
    if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
        return Err(Error::ControlFrameTooLarge(payload.len()));
    }
    Ok(Frame::new(true, opcode, payload))
}

/// Handshake, then hand the two halves of the transport to the I/O tasks.
async fn start(inner: &Arc<Inner>, socket: Socket, span: Span) -> Result<()> {
    let options = &inner.options;
    let (mut rd, mut wr) = tokio::io::split(socket.io);

    let request = HandshakeRequest::from_options(options);
    let (response, leftover) = handshake(&mut rd, &mut wr, &request, options).await?;
    if options.verify_accept {
        response.verify_accept(&request)?;
        response.verify_protocol(&request)?;
    }
    debug!(protocol = ?response.protocol, pipelined = leftover.len(), "handshake complete");

    let _ = inner.session.set(Session {
        protocol: response.protocol,
        local_addr: socket.local_addr,
        peer_addr: socket.peer_addr,
    });

    let reader = FrameReader::with_prebuffer(rd, leftover, options.limits.clone());
    let writer = FrameWriter::new(wr, options.timeouts.write);
    let (tx, rx) = mpsc::channel(OUTGOING_QUEUE);

    let mut io = inner.io.lock().unwrap_or_else(PoisonError::into_inner);
    if io.released || !inner.state.set_connected() {
        return Err(Error::ConnectionClosed(None));
    }
    io.outgoing = Some(tx);
    io.tasks.push(tokio::spawn(
        write_loop(Arc::clone(inner), writer, rx).instrument(span.clone()),
    ));
    io.tasks.push(tokio::spawn(
        read_loop(Arc::clone(inner), reader).instrument(span),
    ));
    debug!("connected");
    Ok(())
}

/// Send the upgrade request and read the response head.
///
/// Returns the parsed response and any bytes that followed the head.
async fn handshake<R, W>(
    rd: &mut R,
    wr: &mut W,
    request: &HandshakeRequest,
    options: &ConnectionOptions,
) -> Result<(HandshakeResponse, BytesMut)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let bytes = request.to_bytes()?;
    trace!(host = %request.host, path = %request.path, "sending handshake request");
    timeout(options.timeouts.write, async {
        wr.write_all(&bytes).await?;
        wr.flush().await
    })
    .await
    .map_err(|_| Error::Timeout("handshake request"))??;

    let mut buf = BytesMut::with_capacity(1024);
    let end = timeout(
        options.timeouts.read,
        read_head(rd, &mut buf, &options.limits),
    )
    .await
    .map_err(|_| Error::Timeout("handshake response"))??;

    let leftover = buf.split_off(end);
    let response = HandshakeResponse::parse(&buf)?;
    Ok((response, leftover))
}

async fn read_head<R: AsyncRead + Unpin>(
    rd: &mut R,
    buf: &mut BytesMut,
    limits: &Limits,
) -> Result<usize> {
    loop {
        if let Some(end) = find_header_end(buf) {
            return Ok(end);
        }
        limits.check_handshake_size(buf.len())?;
        buf.reserve(1024);
        if rd.read_buf(buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed before handshake response completed".into(),
            ));
        }
    }
}

async fn write_loop(
    inner: Arc<Inner>,
    mut writer: FrameWriter<WriteHalf<BoxedTransport>>,
    mut rx: mpsc::Receiver<Outgoing>,
) {
    while let Some(Outgoing { frames, ack }) = rx.recv().await {
        let mut result = Ok(());
        for frame in frames {
            if let Err(e) = writer.write_frame(frame).await {
                result = Err(e);
                break;
            }
        }
        let failure = result.as_ref().err().cloned();
        let _ = ack.send(result);

        if let Some(e) = failure {
            warn!(error = %e, "write failed");
            inner.state.disconnect(Disconnect::error(e));
            inner.release();
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(inner: Arc<Inner>, mut reader: FrameReader<ReadHalf<BoxedTransport>>) {
    let mut assembler = MessageAssembler::new(inner.options.limits.clone());
    let failure = loop {
        if !inner.state.get().is_connected() {
            break None;
        }
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) => break Some(e),
        };
        match inner.handle_frame(frame, &mut assembler).await {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break None,
            Err(e) => break Some(e),
        }
    };

    if let Some(e) = failure {
        inner.fail(e).await;
    }
    inner.release();
}

impl Inner {
    fn emit(&self, message: WebSocketMessage) {
        if self.incoming.send(message).is_err() {
            trace!("no subscribers for incoming message");
        }
    }

    /// Queue frames for the writer and wait for the result.
    async fn enqueue(&self, frames: Vec<Frame>) -> Result<()> {
        let sender = self
            .io
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outgoing
            .clone()
            .ok_or(Error::ConnectionClosed(None))?;

        let (ack, done) = oneshot::channel();
        sender
            .send(Outgoing { frames, ack })
            .await
            .map_err(|_| Error::ConnectionClosed(None))?;
        done.await.map_err(|_| Error::ConnectionClosed(None))?
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        assembler: &mut MessageAssembler,
    ) -> Result<ControlFlow<()>> {
        match frame.opcode {
            OpCode::Ping => {
                let payload = frame.into_payload();
                self.emit(WebSocketMessage::Ping(payload.clone()));
                // The pong is on the wire before the next frame is read.
                self.enqueue(vec![Frame::pong(payload)]).await?;
            }
            OpCode::Pong => self.emit(WebSocketMessage::Pong(frame.into_payload())),
            OpCode::Close => {
                self.on_peer_close(frame.payload()).await;
                return Ok(ControlFlow::Break(()));
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Some(message) = assembler.push(frame)? {
                    self.emit(message.into_message()?);
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn on_peer_close(&self, payload: &[u8]) {
        self.peer_closed.store(true, Ordering::SeqCst);
        if self.closing.swap(true, Ordering::SeqCst) {
            trace!("close acknowledged by peer");
            return;
        }
        let close = PeerClose::parse(payload);
        debug!(
            code = %close.received.code,
            reason = %close.received.reason,
            violation = close.violation,
            "peer closed"
        );

        let mut disconnect = Disconnect::closed(close.reply.code, close.reply.reason.clone());
        if close.violation {
            disconnect = disconnect.with_cause(Error::ProtocolViolation(close.reply.reason.clone()));
        }
        self.state.disconnect(disconnect);

        let reply = Frame::new(true, OpCode::Close, close.reply.to_payload());
        if let Err(e) = self.enqueue(vec![reply]).await {
            debug!(error = %e, "close reply not written");
        }
        self.emit(WebSocketMessage::Close(close.received));
    }

    /// End the connection after a read failure, sending a Close frame when
    /// the failure has a close code.
    async fn fail(&self, error: Error) {
        let code = error
            .close_code()
            .filter(|_| !self.peer_closed.load(Ordering::SeqCst));
        let Some(code) = code else {
            debug!(error = %error, "connection lost");
            self.state.disconnect(Disconnect::error(error));
            return;
        };

        let reason = error.close_reason();
        warn!(error = %error, %code, "closing on protocol error");
        let disconnect = Disconnect::closed(code, reason.clone()).with_cause(error);
        if !self.state.disconnect(disconnect) || self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        match close_payload(code, &reason) {
            Ok(payload) => {
                if let Err(e) = self.enqueue(vec![Frame::new(true, OpCode::Close, payload)]).await {
                    debug!(error = %e, "close frame not written");
                }
            }
            Err(e) => debug!(error = %e, "no close frame for this code"),
        }
    }

    /// Reject further sends, stop both tasks and drop the transport. Idempotent.
    fn release(&self) {
        let mut io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        if io.released {
            return;
        }
        io.released = true;
        io.outgoing = None;
        for task in io.tasks.drain(..) {
            task.abort();
        }
    }
}
