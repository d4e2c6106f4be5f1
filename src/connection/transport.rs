//! Byte-stream transports and the connectors that open them.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{LazyLock, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ConnectionOptions;
use crate::error::Result;

/// Anything a WebSocket can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport owned by a connection.
pub type BoxedTransport = Box<dyn Transport>;

/// An open transport plus what is known about its endpoints.
pub struct Socket {
    pub io: BoxedTransport,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
}

impl Socket {
    /// Wrap a stream whose addresses are unknown.
    pub fn new<T: Transport>(io: T) -> Self {
        Self {
            io: Box::new(io),
            local_addr: None,
            peer_addr: None,
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

/// Opens the transport for a connection.
///
/// The connect timeout is applied by the caller around the whole future.
pub trait Connector: Send + Sync {
    fn connect(&self, options: &ConnectionOptions) -> impl Future<Output = Result<Socket>> + Send;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub(crate) async fn open(options: &ConnectionOptions) -> Result<TcpStream> {
        let stream = TcpStream::connect((options.host.as_str(), options.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Socket> {
        let stream = Self::open(options).await?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        debug!(?local_addr, ?peer_addr, "tcp connected");
        Ok(Socket {
            io: Box::new(stream),
            local_addr,
            peer_addr,
        })
    }
}

/// TCP, wrapped in TLS when `options.tls` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Socket> {
        if !options.tls {
            return TcpConnector.connect(options).await;
        }

        #[cfg(feature = "tls-rustls")]
        {
            crate::tls::RustlsConnector::with_webpki_roots()
                .connect(options)
                .await
        }

        #[cfg(not(feature = "tls-rustls"))]
        {
            Err(crate::error::Error::Tls(format!(
                "{} requires TLS but the tls-rustls feature is disabled",
                options.url()
            )))
        }
    }
}

/// Connections opened per `host:port` since process start.
static CONNECTION_COUNTERS: LazyLock<Mutex<HashMap<String, u64>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn counter_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// Bump the counter for `host:port` and return the new value.
pub(crate) fn next_connection_id(host: &str, port: u16) -> u64 {
    let mut counters = CONNECTION_COUNTERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let count = counters.entry(counter_key(host, port)).or_insert(0);
    *count += 1;
    *count
}

/// Number of connections started to `host:port` by this process.
#[must_use]
pub fn connection_count(host: &str, port: u16) -> u64 {
    CONNECTION_COUNTERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&counter_key(host, port))
        .copied()
        .unwrap_or(0)
}
