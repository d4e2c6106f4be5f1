//! WebSocket client connection, its I/O tasks and state machine.
//!
//! ## Connection Lifecycle
//!
//! 1. **Initialized** - Created, nothing opened yet
//! 2. **Connecting** - Transport opening and handshake in progress
//! 3. **Connected** - Frames flow in both directions
//! 4. **Disconnected** - Terminal, carries the close code and/or error
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsclient::{CloseCode, ConnectionOptions, WebSocketClient};
//!
//! let client = WebSocketClient::new(ConnectionOptions::from_url("ws://example.com/chat")?);
//! let mut messages = client.incoming_messages();
//! client.connect().await?;
//!
//! client.write_text("Hello").await?;
//! let reply = messages.recv().await?;
//! client.close(CloseCode::Normal, "done").await?;
//! ```

mod client;
mod codec;
mod fragmenter;
mod state;
mod transport;

pub use client::WebSocketClient;
pub use codec::{FrameReader, FrameWriter};
pub use fragmenter::MessageFragmenter;
pub use state::{ConnectionState, Disconnect};
pub use transport::{
    BoxedTransport, Connector, DefaultConnector, Socket, TcpConnector, Transport, connection_count,
};
