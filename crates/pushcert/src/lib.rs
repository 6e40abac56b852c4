//! # pushcert
//!
//! Certificate-authenticated client for the Apple Push Notification service.
//!
//! The client authenticates with a client certificate taken from a
//! password-protected PKCS#12 archive and sends alert notifications over
//! HTTP/2:
//!
//! - **Archive**: [`archive::ArchiveLocator`] finds `<name>.p12`; [`identity::resolve_identities`] decodes it
//! - **Validation**: [`validator::validate`] accepts only certificates whose subject carries a push prefix
//! - **Challenge**: [`challenge::ChallengeHandler`] answers the TLS client-certificate request, computed once
//! - **Dispatch**: [`PushClient`] builds, sends and classifies requests; errors go to the result and the [`ErrorSink`]
//! - **Config**: [`config::PushSettings`] loaded from `~/.pushcert/config.json` with env overrides
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use pushcert::{CertificateConfig, Host, Payload, Priority, PushClient};
//!
//! let client = PushClient::new(CertificateConfig::new("push", "secret", Host::Sandbox))?;
//! let payload = Payload::new("Hello", "World", Priority::Immediate, "a1b2c3", "com.example.app");
//! let receipt = client.push(payload).await?;
//! println!("{receipt:?}");
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod archive;
pub mod challenge;
pub mod client;
pub mod config;
mod dispatcher;
pub mod errors;
pub mod identity;
pub mod payload;
pub mod tls;
pub mod transport;
pub mod validator;

#[cfg(test)]
mod testutil;

pub use archive::{ArchiveLocator, DirectoryLocator, MemoryLocator};
pub use challenge::{ArchiveIdentitySource, ChallengeHandler, ChallengeOutcome, IdentitySource};
pub use client::{PushClient, PushClientBuilder, PushHandle};
pub use config::{CertificateConfig, ConfigError, Host, PushSettings};
pub use dispatcher::{PushReceipt, PushResult};
pub use errors::{ClientBuildError, ErrorSink, PushError, TransportError};
pub use identity::Identity;
pub use payload::{Payload, Priority};
pub use transport::{PushRequest, PushTransport, ReqwestTransport, TransportResponse};
pub use validator::ValidatedIdentity;
