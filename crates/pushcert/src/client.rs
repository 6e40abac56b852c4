//! Push client: owns the credential cache, the transport and a worker task.
//!
//! Calls are queued to a worker owned by the client. Each dispatch runs as
//! its own task, so concurrent pushes may complete out of order. Results
//! travel back over a oneshot channel and are observed on the caller's task.
//!
//! # Shutdown
//!
//! [`PushClient::shutdown`] stops accepting new pushes, lets already queued
//! pushes run, and waits until every in-flight dispatch has delivered its
//! result. Dropping the client closes the queue the same way without
//! waiting.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use rustls::RootCertStore;
use rustls::client::ResolvesClientCert;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveLocator, DirectoryLocator};
use crate::challenge::{ArchiveIdentitySource, ChallengeHandler, IdentitySource};
use crate::config::{CertificateConfig, DEFAULT_REQUEST_TIMEOUT_SECS, PushSettings};
use crate::dispatcher::{Dispatcher, PushResult};
use crate::errors::{ClientBuildError, ErrorSink, PushError};
use crate::payload::Payload;
use crate::tls;
use crate::transport::{PushTransport, ReqwestTransport};

struct Job {
    payload: Payload,
    reply: oneshot::Sender<PushResult>,
}

/// Pending result of a submitted push.
///
/// Resolves exactly once, to the outcome of the dispatch. If the dispatch
/// disappears without answering, resolves to [`PushError::Aborted`], which is
/// also reported to the error sink.
#[must_use = "a push handle does nothing unless awaited"]
pub struct PushHandle {
    rx: oneshot::Receiver<PushResult>,
    sink: Option<ErrorSink>,
}

impl std::fmt::Debug for PushHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHandle").finish_non_exhaustive()
    }
}

impl Future for PushHandle {
    type Output = PushResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                warn!("push dispatch dropped without a result");
                let err = PushError::Aborted;
                if let Some(sink) = &self.sink {
                    sink(&err);
                }
                Err(err)
            })
        })
    }
}

/// Certificate-authenticated APNs client.
pub struct PushClient {
    config: Arc<CertificateConfig>,
    dispatcher: Arc<Dispatcher>,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("config", &self.config)
            .field("accepting", &self.queue.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl PushClient {
    /// Client with default settings, reading `<name>.p12` from the working
    /// directory.
    pub fn new(config: CertificateConfig) -> Result<Self, ClientBuildError> {
        Self::builder(config).build()
    }

    /// Client configured from loaded [`PushSettings`].
    pub fn from_settings(settings: PushSettings) -> Result<Self, ClientBuildError> {
        let timeout = settings.request_timeout();
        let mut builder = Self::builder(settings.certificate).request_timeout(timeout);
        if let Some(dir) = settings.archive_dir {
            builder = builder.archive_dir(dir);
        }
        builder.build()
    }

    /// Start configuring a client.
    pub fn builder(config: CertificateConfig) -> PushClientBuilder {
        PushClientBuilder::new(config)
    }

    /// Certificate configuration this client was built with.
    pub fn config(&self) -> &CertificateConfig {
        &self.config
    }

    /// Queue `payload` for delivery without waiting.
    pub fn submit(&self, payload: Payload) -> PushHandle {
        let (reply, rx) = oneshot::channel();
        let job = Job { payload, reply };

        let rejected = match self.queue.lock().as_ref() {
            Some(tx) => tx.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            let err = PushError::ShutDown;
            self.dispatcher.report(&err);
            let _ = job.reply.send(Err(err));
        }

        PushHandle {
            rx,
            sink: self.dispatcher.error_sink(),
        }
    }

    /// Deliver `payload` and wait for the outcome.
    pub async fn push(&self, payload: Payload) -> PushResult {
        self.submit(payload).await
    }

    /// Stop accepting pushes and wait for in-flight ones to finish.
    pub async fn shutdown(&self) {
        drop(self.queue.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "push worker terminated abnormally");
            }
        }
        info!(name = %self.config.name, "push client shut down");
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, dispatcher: Arc<Dispatcher>) {
    let tracker = TaskTracker::new();
    while let Some(job) = rx.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        let _ = tracker.spawn(async move {
            let result = match AssertUnwindSafe(dispatcher.dispatch(job.payload))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("push dispatch panicked");
                    let err = PushError::Aborted;
                    dispatcher.report(&err);
                    Err(err)
                }
            };
            if job.reply.send(result).is_err() {
                debug!("push caller dropped its handle before completion");
            }
        });
    }
    let _ = tracker.close();
    tracker.wait().await;
    debug!("push worker drained");
}

/// Builder for [`PushClient`].
pub struct PushClientBuilder {
    config: CertificateConfig,
    locator: Option<Arc<dyn ArchiveLocator>>,
    identity_source: Option<Arc<dyn IdentitySource>>,
    transport: Option<Arc<dyn PushTransport>>,
    error_sink: Option<ErrorSink>,
    request_timeout: Duration,
    base_url: Option<String>,
    roots: Option<RootCertStore>,
    runtime: Option<Handle>,
}

impl PushClientBuilder {
    fn new(config: CertificateConfig) -> Self {
        Self {
            config,
            locator: None,
            identity_source: None,
            transport: None,
            error_sink: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            base_url: None,
            roots: None,
            runtime: None,
        }
    }

    /// Read `<name>.p12` from `dir`.
    #[must_use]
    pub fn archive_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.locator(Arc::new(DirectoryLocator::new(dir)))
    }

    /// Locate the archive through `locator`.
    #[must_use]
    pub fn locator(mut self, locator: Arc<dyn ArchiveLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Take identities from `source` instead of the certificate archive.
    #[must_use]
    pub fn identity_source(mut self, source: Arc<dyn IdentitySource>) -> Self {
        self.identity_source = Some(source);
        self
    }

    /// Send requests through `transport` instead of the mutual-TLS client.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Observe every error the client detects.
    #[must_use]
    pub fn error_sink(mut self, sink: impl Fn(&PushError) + Send + Sync + 'static) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// HTTP request timeout (default 30 s).
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the host's base URL, e.g. to go through a proxy.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Trust `roots` instead of the webpki roots when verifying the server.
    /// Ignored when a custom transport is set.
    #[must_use]
    pub fn root_certificates(mut self, roots: RootCertStore) -> Self {
        self.roots = Some(roots);
        self
    }

    /// Runtime that owns the worker. Defaults to the current runtime.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the client and start its worker.
    pub fn build(self) -> Result<PushClient, ClientBuildError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()?,
        };

        let config = Arc::new(self.config);
        let source = self.identity_source.unwrap_or_else(|| {
            let locator = self
                .locator
                .unwrap_or_else(|| Arc::new(DirectoryLocator::new(".")));
            Arc::new(ArchiveIdentitySource::new(Arc::clone(&config), locator))
        });
        let challenge = Arc::new(ChallengeHandler::new(source));

        let transport: Arc<dyn PushTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                let resolver: Arc<dyn ResolvesClientCert> = Arc::clone(&challenge) as _;
                let tls = match self.roots {
                    Some(roots) => tls::client_config_with_roots(resolver, roots)?,
                    None => tls::client_config(resolver)?,
                };
                Arc::new(ReqwestTransport::with_tls(tls, self.request_timeout)?)
            }
        };

        let base_url = self
            .base_url
            .unwrap_or_else(|| config.host.base_url().to_string());
        let dispatcher = Arc::new(Dispatcher::new(
            base_url,
            challenge,
            transport,
            self.error_sink,
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = runtime.spawn(run_worker(rx, Arc::clone(&dispatcher)));

        info!(name = %config.name, host = %config.host, "push client started");

        Ok(PushClient {
            config,
            dispatcher,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }
}
