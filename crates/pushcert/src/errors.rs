//! Error types for push dispatch and client construction.

use std::sync::Arc;

/// Errors reported for a single push call.
///
/// Every variant is delivered through the per-call result and, when one is
/// configured, through the client's [`ErrorSink`].
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// No identity in the certificate archive could be used for push.
    ///
    /// Covers a missing or unreadable archive, a wrong password, and an
    /// archive whose certificates are not push certificates. The cause is
    /// logged but not distinguished here.
    #[error("unable to set up signature from push certificate (p12) archive")]
    AuthenticationSetup,

    /// The HTTPS exchange failed before a response was received.
    #[error("transport error: {source}")]
    Transport {
        /// Underlying failure.
        #[from]
        source: TransportError,
    },

    /// APNs answered with a non-empty body, which signals a rejection.
    #[error("APNs rejected the notification (status {status}): {message}")]
    Protocol {
        /// HTTP status code of the response.
        status: u16,
        /// Response body, verbatim.
        message: String,
        /// `reason` field of the body when it is JSON.
        reason: Option<String>,
    },

    /// A payload field required for routing is empty or malformed.
    #[error("invalid payload: {field} {problem}")]
    InvalidPayload {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        problem: &'static str,
    },

    /// The request URL could not be built from the host and device token.
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl {
        /// URL that failed to parse.
        url: String,
        /// Parser error description.
        reason: String,
    },

    /// The client was shut down before the push could be dispatched.
    #[error("push client has shut down")]
    ShutDown,

    /// The dispatch ended without producing a result, e.g. its task panicked
    /// or the runtime went away.
    #[error("push was aborted before completing")]
    Aborted,
}

/// Network and TLS level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Error raised by the HTTP client (connect, DNS, TLS, timeout).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Connection failure described by a custom transport.
    #[error("connection failed: {reason}")]
    Connection {
        /// Error description.
        reason: String,
    },
}

/// Errors raised while constructing a [`PushClient`](crate::PushClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// The client was built outside a tokio runtime and none was supplied.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The rustls client configuration was rejected.
    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    /// The reqwest client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Out-of-band error observer, invoked once for every error the client detects.
pub type ErrorSink = Arc<dyn Fn(&PushError) + Send + Sync>;
