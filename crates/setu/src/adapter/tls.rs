//! TLS for the socket adapter.

use crate::error::TransportError;
use once_cell::sync::OnceCell;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

static CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

/// Client configuration trusting the Mozilla root set.
fn client_config() -> Result<Arc<ClientConfig>, TransportError> {
    CONFIG
        .get_or_try_init(|| {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let config = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| TransportError::network(format!("TLS setup failed: {e}")))?
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(Arc::new(config))
        })
        .cloned()
}

/// Run the TLS handshake for `host` over `tcp`.
pub(crate) async fn connect(
    host: &str,
    tcp: TcpStream,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let config = client_config()?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::InvalidRequest(format!("invalid TLS server name '{host}'")))?;
    TlsConnector::from(config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::io("TLS handshake failed", e))
}
