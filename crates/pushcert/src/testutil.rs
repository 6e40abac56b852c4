//! Certificate fixtures for unit tests.

use p12_keystore::{Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};

use crate::archive::MemoryLocator;
use crate::identity::Identity;

/// A freshly generated key pair and self-signed certificate.
pub(crate) struct TestIdentity {
    pub key_der: Vec<u8>,
    pub cert_der: Vec<u8>,
}

impl TestIdentity {
    /// Certificate whose subject common name is `common_name`.
    pub fn generate(common_name: &str) -> Self {
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, common_name);
        Self::with_subject(dn)
    }

    /// Certificate with an empty subject.
    pub fn without_subject() -> Self {
        Self::with_subject(rcgen::DistinguishedName::new())
    }

    fn with_subject(dn: rcgen::DistinguishedName) -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = dn;
        let cert = params.self_signed(&key_pair).unwrap();
        Self {
            key_der: key_pair.serialize_der(),
            cert_der: cert.der().to_vec(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::from_der(self.key_der.clone(), self.cert_der.clone()).unwrap()
    }

    /// Password-protected PKCS#12 archive holding this identity.
    pub fn archive(&self, password: &str) -> Vec<u8> {
        keystore_archive(
            vec![("push", self.key_der.clone(), vec![self.cert_der.clone()])],
            password,
        )
    }
}

/// Archive with one key entry per `(alias, key, chain)`.
pub(crate) fn keystore_archive(entries: Vec<(&str, Vec<u8>, Vec<Vec<u8>>)>, password: &str) -> Vec<u8> {
    let mut store = KeyStore::new();
    for (index, (alias, key, chain)) in entries.into_iter().enumerate() {
        let chain = chain.iter().map(|der| Certificate::from_der(der).unwrap());
        let local_key_id = [u8::try_from(index + 1).unwrap(); 20];
        store.add_entry(
            alias,
            KeyStoreEntry::PrivateKeyChain(PrivateKeyChain::new(key, local_key_id, chain)),
        );
    }
    store.writer(password).write().unwrap()
}

pub(crate) fn archive_locator(name: &str, fixture: &TestIdentity, password: &str) -> MemoryLocator {
    MemoryLocator::new().with_archive(name, fixture.archive(password))
}
