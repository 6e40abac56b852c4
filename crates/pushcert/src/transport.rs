//! HTTP transport seam and its reqwest implementation.
//!
//! The dispatcher builds a [`PushRequest`] and hands it to a
//! [`PushTransport`]. Production uses [`ReqwestTransport`] over HTTP/2 with
//! the mutual-TLS configuration from [`crate::tls`]; tests substitute their
//! own transport.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::errors::{ClientBuildError, TransportError};

/// A fully built push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// `{base}/3/device/{token}`.
    pub url: Url,
    /// Request headers, in insertion order.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body.
    pub body: Vec<u8>,
}

impl PushRequest {
    /// Value of header `name`, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the transport received back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// `apns-id` response header.
    pub apns_id: Option<String>,
    /// Response body as text.
    pub body: String,
}

/// Sends push requests over an authenticated connection.
#[async_trait]
pub trait PushTransport: Send + Sync + fmt::Debug {
    /// POST `request` and return the response, or the transport failure.
    async fn send(&self, request: PushRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// HTTP/2 client using `tls` for the handshake.
    pub fn with_tls(tls: rustls::ClientConfig, timeout: Duration) -> Result<Self, ClientBuildError> {
        // APNs only speaks HTTP/2; ALPN alone leaves reqwest on HTTP/1.1.
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .http2_prior_knowledge()
            .timeout(timeout)
            .build()
            .map_err(ClientBuildError::HttpClient)?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PushTransport for ReqwestTransport {
    async fn send(&self, request: PushRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.post(request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            apns_id,
            body,
        })
    }
}
