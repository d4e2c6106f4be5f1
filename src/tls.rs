//! TLS for `wss://` connections (feature `tls-rustls`).

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::config::ConnectionOptions;
use crate::connection::{Connector, Socket, TcpConnector};
use crate::error::{Error, Result};

/// Client config trusting the Mozilla root set shipped in `webpki-roots`.
#[must_use]
pub fn client_config_with_webpki_roots() -> Arc<ClientConfig> {
    let root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Opens TCP, then runs a rustls client handshake using the option host as
/// the server name.
#[derive(Clone)]
pub struct RustlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl RustlsConnector {
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    #[must_use]
    pub fn with_webpki_roots() -> Self {
        Self::new(client_config_with_webpki_roots())
    }
}

impl std::fmt::Debug for RustlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsConnector").finish_non_exhaustive()
    }
}

impl Connector for RustlsConnector {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Socket> {
        let server_name = ServerName::try_from(options.host.clone())
            .map_err(|_| Error::Tls(format!("invalid DNS name: {}", options.host)))?;

        let tcp = TcpConnector::open(options).await?;
        let local_addr = tcp.local_addr().ok();
        let peer_addr = tcp.peer_addr().ok();

        let stream = self
            .inner
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        debug!(host = %options.host, ?peer_addr, "tls established");

        Ok(Socket {
            io: Box::new(stream),
            local_addr,
            peer_addr,
        })
    }
}
