//! rustls client configuration for mutual TLS with APNs.

use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};

/// ALPN protocol APNs speaks.
const ALPN_H2: &[u8] = b"h2";

/// Crypto provider used for key loading and handshakes.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client configuration trusting the webpki roots and answering client
/// certificate requests through `resolver`.
pub fn client_config(resolver: Arc<dyn ResolvesClientCert>) -> Result<ClientConfig, rustls::Error> {
    client_config_with_roots(resolver, webpki_root_store())
}

/// Like [`client_config`], trusting only `roots`.
pub fn client_config_with_roots(
    resolver: Arc<dyn ResolvesClientCert>,
    roots: RootCertStore,
) -> Result<ClientConfig, rustls::Error> {
    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_cert_resolver(resolver);
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(config)
}

fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}
