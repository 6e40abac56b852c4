//! Identity resolution from password-protected PKCS#12 archives.
//!
//! An archive may bundle several key/certificate pairs. Each private key is
//! paired with the certificate carrying the same public key, searching the
//! certificate the archive binds to the key first and then every other
//! certificate in the archive. When the key type cannot report its public
//! key, the archive's own binding is trusted. A key with no matching
//! certificate is skipped.
//!
//! Resolution fails soft: a missing archive, a wrong password or a corrupt
//! file all yield an empty list, and the cause is only logged.

use std::fmt;
use std::sync::Arc;

use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::{CertifiedKey, SigningKey};
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::archive::ArchiveLocator;
use crate::config::CertificateConfig;
use crate::tls::crypto_provider;
use crate::validator::subject_summary;

/// A private signing key paired with its certificate.
#[derive(Clone)]
pub struct Identity {
    key: Arc<dyn SigningKey>,
    certificate: CertificateDer<'static>,
}

impl Identity {
    /// Build an identity from a PKCS#8 private key and a DER certificate.
    pub fn from_der(
        key_pkcs8: impl Into<Vec<u8>>,
        certificate: impl Into<Vec<u8>>,
    ) -> Result<Self, rustls::Error> {
        let key = load_signing_key(key_pkcs8.into())?;
        Ok(Self {
            key,
            certificate: CertificateDer::from(certificate.into()),
        })
    }

    /// DER-encoded certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Credential presented during the TLS handshake.
    pub(crate) fn certified_key(&self) -> CertifiedKey {
        CertifiedKey::new(vec![self.certificate.clone()], Arc::clone(&self.key))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &subject_summary(&self.certificate))
            .field("algorithm", &self.key.algorithm())
            .finish_non_exhaustive()
    }
}

/// Extract every identity from the archive named by `config`.
///
/// Order follows the archive's entry names and is stable for a given
/// archive.
pub fn resolve_identities(config: &CertificateConfig, locator: &dyn ArchiveLocator) -> Vec<Identity> {
    let Some(bytes) = locator.locate(&config.name) else {
        warn!(name = %config.name, "certificate archive not found");
        return Vec::new();
    };

    match decode_archive(&bytes, &config.password) {
        Ok(identities) => {
            debug!(
                name = %config.name,
                count = identities.len(),
                "certificate archive decrypted"
            );
            identities
        }
        Err(e) => {
            warn!(name = %config.name, error = %e, "failed to open certificate archive");
            Vec::new()
        }
    }
}

/// Archive could not be decrypted (wrong password, unsupported or corrupt).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ArchiveError(String);

/// A private key and the certificate the archive binds to it, if any.
struct KeyEntry {
    key_der: Vec<u8>,
    bound: Option<Vec<u8>>,
}

fn decode_archive(bytes: &[u8], password: &str) -> Result<Vec<Identity>, ArchiveError> {
    let store = KeyStore::from_pkcs12(bytes, password).map_err(|e| ArchiveError(e.to_string()))?;

    let mut entries: Vec<_> = store.entries().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut keys = Vec::new();
    let mut certs = Vec::new();
    for (alias, entry) in entries {
        match entry {
            KeyStoreEntry::PrivateKeyChain(chain) => {
                let chain_der: Vec<Vec<u8>> =
                    chain.chain().iter().map(|c| c.as_der().to_vec()).collect();
                keys.push(KeyEntry {
                    key_der: chain.key().to_vec(),
                    bound: chain_der.first().cloned(),
                });
                certs.extend(chain_der);
            }
            KeyStoreEntry::Certificate(cert) => {
                debug!(alias = %alias, "archive holds a certificate without a key");
                certs.push(cert.as_der().to_vec());
            }
        }
    }

    Ok(pair_identities(keys, &certs))
}

fn pair_identities(keys: Vec<KeyEntry>, certs: &[Vec<u8>]) -> Vec<Identity> {
    let mut identities = Vec::with_capacity(keys.len());

    for (index, entry) in keys.into_iter().enumerate() {
        let key = match load_signing_key(entry.key_der) {
            Ok(key) => key,
            Err(e) => {
                warn!(index, error = %e, "skipping unsupported private key");
                continue;
            }
        };

        let cert = match key.public_key() {
            Some(spki) => entry
                .bound
                .iter()
                .chain(certs)
                .find(|cert| certificate_spki(cert).as_deref() == Some(spki.as_ref()))
                .cloned(),
            None => entry.bound,
        };
        let Some(cert) = cert else {
            warn!(index, "no certificate in archive matches private key");
            continue;
        };

        identities.push(Identity {
            key,
            certificate: CertificateDer::from(cert),
        });
    }

    identities
}

fn certificate_spki(der: &[u8]) -> Option<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    Some(cert.public_key().raw.to_vec())
}

fn load_signing_key(pkcs8: Vec<u8>) -> Result<Arc<dyn SigningKey>, rustls::Error> {
    let der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8));
    crypto_provider().key_provider.load_private_key(der)
}
