//! Request dispatch: build, send and classify one push.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::challenge::{ChallengeHandler, ChallengeOutcome};
use crate::errors::{ErrorSink, PushError};
use crate::payload::Payload;
use crate::transport::{PushRequest, PushTransport, TransportResponse};

/// Successful delivery to APNs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    /// HTTP status code.
    pub status: u16,
    /// APNs-assigned notification id.
    pub apns_id: Option<String>,
}

/// Outcome of a single push call.
pub type PushResult = Result<PushReceipt, PushError>;

pub(crate) struct Dispatcher {
    base_url: String,
    challenge: Arc<ChallengeHandler>,
    transport: Arc<dyn PushTransport>,
    error_sink: Option<ErrorSink>,
}

impl Dispatcher {
    pub(crate) fn new(
        base_url: impl Into<String>,
        challenge: Arc<ChallengeHandler>,
        transport: Arc<dyn PushTransport>,
        error_sink: Option<ErrorSink>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            challenge,
            transport,
            error_sink,
        }
    }

    /// Dispatch `payload`, reporting any failure to the error sink.
    pub(crate) async fn dispatch(&self, payload: Payload) -> PushResult {
        let result = self.try_dispatch(&payload).await;
        if let Err(ref e) = result {
            self.report(e);
        }
        result
    }

    pub(crate) fn error_sink(&self) -> Option<ErrorSink> {
        self.error_sink.clone()
    }

    pub(crate) fn report(&self, error: &PushError) {
        if let Some(sink) = &self.error_sink {
            sink(error);
        }
    }

    async fn try_dispatch(&self, payload: &Payload) -> PushResult {
        payload.validate()?;
        let request = self.build_request(payload)?;
        self.ensure_identity().await?;

        let token = token_prefix(&payload.target_token);
        debug!(
            url = %request.url,
            token_prefix = token,
            topic = %payload.target_bundle_id,
            priority = payload.priority.value(),
            "APNS request"
        );

        let response = self.transport.send(request).await.map_err(|e| {
            warn!(error = %e, token_prefix = token, "APNS request failed (transport error)");
            PushError::from(e)
        })?;

        let result = classify(response);
        match &result {
            Ok(receipt) => info!(
                status = receipt.status,
                apns_id = ?receipt.apns_id,
                token_prefix = token,
                "APNS send OK"
            ),
            Err(e) => warn!(error = %e, token_prefix = token, "APNS send rejected"),
        }
        result
    }

    pub(crate) fn build_request(&self, payload: &Payload) -> Result<PushRequest, PushError> {
        let raw = format!(
            "{}/3/device/{}",
            self.base_url.trim_end_matches('/'),
            payload.target_token
        );
        let url = Url::parse(&raw).map_err(|e| PushError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        let body = payload.to_json().map_err(|e| {
            warn!(error = %e, "failed to serialize APNS payload");
            PushError::InvalidPayload {
                field: "body",
                problem: "could not be serialized",
            }
        })?;

        Ok(PushRequest {
            url,
            headers: vec![
                ("apns-priority", payload.priority.header_value()),
                ("apns-topic", payload.target_bundle_id.clone()),
                ("apns-push-type", "alert".to_string()),
                ("content-type", "application/json".to_string()),
            ],
            body,
        })
    }

    /// Derive the client identity before touching the network.
    ///
    /// Archive decryption is CPU-bound, so the first derivation runs on the
    /// blocking pool.
    pub(crate) async fn ensure_identity(&self) -> Result<(), PushError> {
        if self.challenge.is_resolved() {
            return Ok(());
        }
        let handler = Arc::clone(&self.challenge);
        match tokio::task::spawn_blocking(move || handler.respond()).await {
            Ok(ChallengeOutcome::Resolved(_)) => Ok(()),
            Ok(ChallengeOutcome::Cancelled) => Err(PushError::AuthenticationSetup),
            Err(e) => {
                warn!(error = %e, "identity derivation task failed");
                Err(PushError::AuthenticationSetup)
            }
        }
    }
}

/// Empty body means delivered; anything else is the APNs rejection text.
fn classify(response: TransportResponse) -> PushResult {
    if response.body.trim().is_empty() {
        return Ok(PushReceipt {
            status: response.status,
            apns_id: response.apns_id,
        });
    }

    let reason = serde_json::from_str::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|v| v.get("reason")?.as_str().map(String::from));
    Err(PushError::Protocol {
        status: response.status,
        message: response.body,
        reason,
    })
}

/// First 8 bytes of a device token, for logs.
fn token_prefix(token: &str) -> &str {
    let mut end = token.len().min(8);
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    &token[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::IdentitySource;
    use crate::errors::TransportError;
    use crate::identity::Identity;
    use crate::payload::Priority;
    use crate::testutil::TestIdentity;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct FixedSource(Vec<Identity>);

    impl IdentitySource for FixedSource {
        fn identities(&self) -> Vec<Identity> {
            self.0.clone()
        }
    }

    #[derive(Debug)]
    enum Reply {
        Body(u16, &'static str),
        Fail(&'static str),
    }

    #[derive(Debug)]
    struct ScriptedTransport {
        reply: Reply,
        sent: Mutex<Vec<PushRequest>>,
    }

    impl ScriptedTransport {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn send(&self, request: PushRequest) -> Result<TransportResponse, TransportError> {
            self.sent.lock().push(request);
            match self.reply {
                Reply::Body(status, body) => Ok(TransportResponse {
                    status,
                    apns_id: Some("apns-1".to_string()),
                    body: body.to_string(),
                }),
                Reply::Fail(reason) => Err(TransportError::Connection {
                    reason: reason.to_string(),
                }),
            }
        }
    }

    fn handler(authorized: bool) -> Arc<ChallengeHandler> {
        let identities = if authorized {
            vec![TestIdentity::generate("Apple Push Services: com.example.app").identity()]
        } else {
            vec![TestIdentity::generate("Apple Development: Jane Doe").identity()]
        };
        Arc::new(ChallengeHandler::new(Arc::new(FixedSource(identities))))
    }

    fn dispatcher(
        authorized: bool,
        transport: Arc<ScriptedTransport>,
        sink: Option<ErrorSink>,
    ) -> Dispatcher {
        Dispatcher::new(
            "https://api.development.push.apple.com",
            handler(authorized),
            transport,
            sink,
        )
    }

    fn payload() -> Payload {
        Payload::new("Hi", "There", Priority::Medium, "a1b2c3d4e5f6", "com.example.app")
    }

    fn counting_sink() -> (ErrorSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ErrorSink = Arc::new(move |e: &PushError| sink_seen.lock().push(e.to_string()));
        (sink, seen)
    }

    #[test]
    fn builds_request_url_and_headers() {
        let d = dispatcher(true, ScriptedTransport::new(Reply::Body(200, "")), None);
        let request = d.build_request(&payload()).unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://api.development.push.apple.com/3/device/a1b2c3d4e5f6"
        );
        assert_eq!(request.header("apns-priority"), Some("5"));
        assert_eq!(request.header("apns-topic"), Some("com.example.app"));
        assert_eq!(request.header("apns-push-type"), Some("alert"));
        assert_eq!(request.body, payload().to_json().unwrap());
    }

    #[tokio::test]
    async fn empty_body_is_success() {
        let transport = ScriptedTransport::new(Reply::Body(200, ""));
        let d = dispatcher(true, Arc::clone(&transport), None);

        let receipt = d.dispatch(payload()).await.unwrap();
        assert_eq!(receipt.status, 200);
        assert_eq!(receipt.apns_id.as_deref(), Some("apns-1"));
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn whitespace_body_is_success() {
        let d = dispatcher(true, ScriptedTransport::new(Reply::Body(200, " \n\t")), None);
        assert!(d.dispatch(payload()).await.is_ok());
    }

    #[tokio::test]
    async fn non_empty_body_is_protocol_error() {
        let (sink, seen) = counting_sink();
        let d = dispatcher(
            true,
            ScriptedTransport::new(Reply::Body(200, r#"{"reason":"BadDeviceToken"}"#)),
            Some(sink),
        );

        let err = d.dispatch(payload()).await.unwrap_err();
        assert_matches!(
            err,
            PushError::Protocol { status: 200, ref message, reason: Some(ref reason) }
                if message == r#"{"reason":"BadDeviceToken"}"# && reason == "BadDeviceToken"
        );
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn plain_text_body_has_no_reason() {
        let d = dispatcher(true, ScriptedTransport::new(Reply::Body(500, "oops")), None);
        let err = d.dispatch(payload()).await.unwrap_err();
        assert_matches!(err, PushError::Protocol { reason: None, ref message, .. } if message == "oops");
    }

    #[tokio::test]
    async fn transport_failure_is_reported_once() {
        let (sink, seen) = counting_sink();
        let d = dispatcher(true, ScriptedTransport::new(Reply::Fail("dns lookup failed")), Some(sink));

        let err = d.dispatch(payload()).await.unwrap_err();
        assert_matches!(
            err,
            PushError::Transport { source: TransportError::Connection { ref reason } }
                if reason == "dns lookup failed"
        );
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], err.to_string());
    }

    #[tokio::test]
    async fn unauthorized_identity_never_reaches_transport() {
        let (sink, seen) = counting_sink();
        let transport = ScriptedTransport::new(Reply::Body(200, ""));
        let d = dispatcher(false, Arc::clone(&transport), Some(sink));

        for _ in 0..3 {
            assert_matches!(d.dispatch(payload()).await, Err(PushError::AuthenticationSetup));
        }
        assert!(transport.sent.lock().is_empty());
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_transport() {
        let transport = ScriptedTransport::new(Reply::Body(200, ""));
        let d = dispatcher(true, Arc::clone(&transport), None);

        let mut bad = payload();
        bad.target_token.clear();
        assert_matches!(
            d.dispatch(bad).await,
            Err(PushError::InvalidPayload { field: "target_token", .. })
        );
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_does_not_invalidate_identity() {
        let d = dispatcher(true, ScriptedTransport::new(Reply::Fail("reset")), None);
        let _ = d.dispatch(payload()).await;
        assert!(d.challenge.is_resolved());
    }

    #[test]
    fn token_prefix_truncates_at_char_boundary() {
        assert_eq!(token_prefix("0123456789abcdef"), "01234567");
        assert_eq!(token_prefix("abc"), "abc");
        assert_eq!(token_prefix("abcdefgéx"), "abcdefg");
    }
}
