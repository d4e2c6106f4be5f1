//! # wsclient - Async WebSocket Client
//!
//! `wsclient` is an RFC 6455 WebSocket client built on tokio.
//!
//! ## Features
//!
//! - **`ws://` and `wss://`** with rustls behind the `tls-rustls` feature
//! - **Strict inbound validation** answered with the matching close code
//! - **Fragmentation** of outgoing messages and reassembly of incoming ones
//! - **Broadcast delivery** of messages and a watchable connection state
//! - **Resource limits** on frames, messages, fragments and the handshake
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsclient::{ConnectionOptions, WebSocketClient};
//!
//! let client = WebSocketClient::new(ConnectionOptions::from_url("wss://example.com/socket")?);
//! let mut messages = client.incoming_messages();
//! client.connect().await?;
//! client.write_text("hello").await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use config::{ConnectionOptions, Limits, Timeouts};
pub use connection::{
    ConnectionState, Connector, DefaultConnector, Disconnect, Socket, TcpConnector,
    WebSocketClient, connection_count,
};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, WebSocketMessage};
pub use protocol::{HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
