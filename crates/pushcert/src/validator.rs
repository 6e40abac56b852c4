//! Push-certificate validation.
//!
//! An archive can carry identities unrelated to push (signing, encryption).
//! Presenting one of those fails the handshake with an opaque TLS error, so
//! identities are filtered client-side by their certificate subject.

use std::fmt;

use rustls::sign::CertifiedKey;
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::identity::Identity;

/// Subject prefixes of certificates issued for APNs provider authentication.
///
/// Matched literally against the certificate's subject summary.
pub const PUSH_CERTIFICATE_PREFIXES: [&str; 6] = [
    "Apple Sandbox Push Services: ",
    "Apple Development IOS Push Services: ",
    "Apple Production IOS Push Services: ",
    "Apple Development Mac Push Services: ",
    "Apple Production Mac Push Services: ",
    "Apple Push Services: ",
];

/// An identity whose certificate is authorized for push.
///
/// Only [`validate`] constructs this type.
#[derive(Clone)]
pub struct ValidatedIdentity {
    identity: Identity,
    subject: String,
}

impl ValidatedIdentity {
    /// Subject summary that matched a push prefix.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The underlying identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn certified_key(&self) -> CertifiedKey {
        self.identity.certified_key()
    }
}

impl fmt::Debug for ValidatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedIdentity")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Human-readable subject summary of a DER certificate.
///
/// The common name, else the e-mail address, organisational unit or
/// organisation. `None` when the certificate does not parse or its subject
/// carries none of these.
pub fn subject_summary(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let subject = cert.subject();

    subject
        .iter_common_name()
        .chain(subject.iter_email())
        .chain(subject.iter_organizational_unit())
        .chain(subject.iter_organization())
        .find_map(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Whether `summary` starts with one of [`PUSH_CERTIFICATE_PREFIXES`].
pub fn has_push_prefix(summary: &str) -> bool {
    PUSH_CERTIFICATE_PREFIXES
        .iter()
        .any(|prefix| summary.starts_with(prefix))
}

/// Whether the identity's certificate is authorized for push.
pub fn is_push_certificate(identity: &Identity) -> bool {
    subject_summary(identity.certificate()).is_some_and(|s| has_push_prefix(&s))
}

/// Promote `identity` to a [`ValidatedIdentity`] if it is a push certificate.
pub fn validate(identity: &Identity) -> Option<ValidatedIdentity> {
    let Some(subject) = subject_summary(identity.certificate()) else {
        debug!("certificate has no subject summary");
        return None;
    };
    if !has_push_prefix(&subject) {
        debug!(subject = %subject, "certificate is not a push certificate");
        return None;
    }
    Some(ValidatedIdentity {
        identity: identity.clone(),
        subject,
    })
}
