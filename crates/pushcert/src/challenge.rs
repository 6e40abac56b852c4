//! TLS client-certificate challenge handling.
//!
//! The handler runs on the transport's handshake context, so it only reads
//! configuration and builds credentials. The first identity that validates
//! is cached for the lifetime of the handler; a failed derivation is not
//! cached, so a later challenge retries.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::SignatureScheme;
use rustls::client::ResolvesClientCert;
use rustls::sign::CertifiedKey;
use tracing::{info, warn};

use crate::archive::ArchiveLocator;
use crate::config::CertificateConfig;
use crate::identity::{Identity, resolve_identities};
use crate::validator::validate;

/// Supplies candidate identities for a challenge.
pub trait IdentitySource: Send + Sync + fmt::Debug {
    /// Candidate identities, in preference order.
    fn identities(&self) -> Vec<Identity>;
}

/// Identities decrypted from the configured certificate archive.
#[derive(Debug)]
pub struct ArchiveIdentitySource {
    config: Arc<CertificateConfig>,
    locator: Arc<dyn ArchiveLocator>,
}

impl ArchiveIdentitySource {
    /// Source reading `config.name` through `locator`.
    pub fn new(config: Arc<CertificateConfig>, locator: Arc<dyn ArchiveLocator>) -> Self {
        Self { config, locator }
    }
}

impl IdentitySource for ArchiveIdentitySource {
    fn identities(&self) -> Vec<Identity> {
        resolve_identities(&self.config, self.locator.as_ref())
    }
}

/// Result of answering a client-certificate challenge.
#[derive(Debug, Clone)]
pub enum ChallengeOutcome {
    /// Present this credential.
    Resolved(Arc<CertifiedKey>),
    /// No authorized identity; the challenge must be cancelled.
    Cancelled,
}

/// Answers TLS client-certificate challenges with a validated push identity.
pub struct ChallengeHandler {
    source: Arc<dyn IdentitySource>,
    cached: Mutex<Option<Arc<CertifiedKey>>>,
}

impl ChallengeHandler {
    /// Handler drawing identities from `source`.
    pub fn new(source: Arc<dyn IdentitySource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Handler backed by the certificate archive described by `config`.
    pub fn from_archive(config: Arc<CertificateConfig>, locator: Arc<dyn ArchiveLocator>) -> Self {
        Self::new(Arc::new(ArchiveIdentitySource::new(config, locator)))
    }

    /// Resolve the credential for a challenge.
    ///
    /// The lock is held across derivation so concurrent challenges decrypt
    /// the archive at most once.
    pub fn respond(&self) -> ChallengeOutcome {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return ChallengeOutcome::Resolved(Arc::clone(key));
        }

        let identities = self.source.identities();
        match identities.iter().find_map(validate) {
            Some(validated) => {
                info!(subject = %validated.subject(), "push identity resolved");
                let key = Arc::new(validated.certified_key());
                *cached = Some(Arc::clone(&key));
                ChallengeOutcome::Resolved(key)
            }
            None => {
                warn!(
                    candidates = identities.len(),
                    "no push certificate available, cancelling challenge"
                );
                ChallengeOutcome::Cancelled
            }
        }
    }

    /// Whether a credential has been derived and cached.
    pub fn is_resolved(&self) -> bool {
        self.cached.lock().is_some()
    }
}

impl fmt::Debug for ChallengeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeHandler")
            .field("source", &self.source)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl ResolvesClientCert for ChallengeHandler {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        match self.respond() {
            ChallengeOutcome::Resolved(key) => Some(key),
            ChallengeOutcome::Cancelled => None,
        }
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Host;
    use crate::testutil::{TestIdentity, archive_locator};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FixedSource {
        identities: Vec<Identity>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(identities: Vec<Identity>) -> Arc<Self> {
            Arc::new(Self {
                identities,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IdentitySource for FixedSource {
        fn identities(&self) -> Vec<Identity> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            self.identities.clone()
        }
    }

    fn resolved_cert(outcome: &ChallengeOutcome) -> Vec<u8> {
        match outcome {
            ChallengeOutcome::Resolved(key) => key.cert[0].to_vec(),
            ChallengeOutcome::Cancelled => panic!("challenge was cancelled"),
        }
    }

    #[test]
    fn selects_single_authorized_identity() {
        let push = TestIdentity::generate("Apple Push Services: com.example.app");
        let handler = ChallengeHandler::new(FixedSource::new(vec![push.identity()]));

        let outcome = handler.respond();
        assert_eq!(resolved_cert(&outcome), push.cert_der);
        assert!(handler.is_resolved());
    }

    #[test]
    fn skips_decoy_identities() {
        let decoy = TestIdentity::generate("Apple Development: Jane Doe");
        let push = TestIdentity::generate("Apple Production IOS Push Services: com.example.app");
        let handler =
            ChallengeHandler::new(FixedSource::new(vec![decoy.identity(), push.identity()]));

        assert_eq!(resolved_cert(&handler.respond()), push.cert_der);
    }

    #[test]
    fn first_authorized_identity_wins() {
        let first = TestIdentity::generate("Apple Push Services: first");
        let second = TestIdentity::generate("Apple Push Services: second");
        let handler =
            ChallengeHandler::new(FixedSource::new(vec![first.identity(), second.identity()]));

        assert_eq!(resolved_cert(&handler.respond()), first.cert_der);
    }

    #[test]
    fn cancels_when_no_identity_validates() {
        let decoy = TestIdentity::generate("Developer ID Application: Example");
        let handler = ChallengeHandler::new(FixedSource::new(vec![decoy.identity()]));

        assert_matches!(handler.respond(), ChallengeOutcome::Cancelled);
        assert!(!handler.is_resolved());
    }

    #[test]
    fn cancels_when_source_is_empty() {
        let handler = ChallengeHandler::new(FixedSource::new(Vec::new()));
        assert_matches!(handler.respond(), ChallengeOutcome::Cancelled);
    }

    #[test]
    fn caches_resolved_identity() {
        let push = TestIdentity::generate("Apple Push Services: com.example.app");
        let source = FixedSource::new(vec![push.identity()]);
        let handler = ChallengeHandler::new(Arc::clone(&source) as Arc<dyn IdentitySource>);

        for _ in 0..5 {
            assert_matches!(handler.respond(), ChallengeOutcome::Resolved(_));
        }
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn failed_derivation_is_retried() {
        let source = FixedSource::new(Vec::new());
        let handler = ChallengeHandler::new(Arc::clone(&source) as Arc<dyn IdentitySource>);

        let _ = handler.respond();
        let _ = handler.respond();
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn concurrent_challenges_derive_once() {
        let push = TestIdentity::generate("Apple Push Services: com.example.app");
        let source = FixedSource::new(vec![push.identity()]);
        let handler = Arc::new(ChallengeHandler::new(
            Arc::clone(&source) as Arc<dyn IdentitySource>
        ));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handler = Arc::clone(&handler);
                std::thread::spawn(move || handler.respond())
            })
            .collect();
        for thread in threads {
            assert_matches!(thread.join().unwrap(), ChallengeOutcome::Resolved(_));
        }
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn rustls_resolver_presents_credential() {
        let push = TestIdentity::generate("Apple Push Services: com.example.app");
        let handler = ChallengeHandler::new(FixedSource::new(vec![push.identity()]));

        let key = handler.resolve(&[], &[]).unwrap();
        assert_eq!(key.cert.len(), 1);
        assert!(handler.has_certs());
    }

    #[test]
    fn rustls_resolver_returns_none_when_cancelled() {
        let handler = ChallengeHandler::new(FixedSource::new(Vec::new()));
        assert!(handler.resolve(&[], &[]).is_none());
    }

    #[test]
    fn archive_backed_handler_resolves() {
        let push = TestIdentity::generate("Apple Sandbox Push Services: com.example.app");
        let locator = archive_locator("push", &push, "pw");
        let handler = ChallengeHandler::from_archive(
            Arc::new(CertificateConfig::new("push", "pw", Host::Sandbox)),
            Arc::new(locator),
        );
        assert_eq!(resolved_cert(&handler.respond()), push.cert_der);
    }

    #[test]
    fn archive_backed_handler_cancels_on_wrong_password() {
        let push = TestIdentity::generate("Apple Sandbox Push Services: com.example.app");
        let locator = archive_locator("push", &push, "pw");
        let handler = ChallengeHandler::from_archive(
            Arc::new(CertificateConfig::new("push", "nope", Host::Sandbox)),
            Arc::new(locator),
        );
        assert_matches!(handler.respond(), ChallengeOutcome::Cancelled);
    }
}
