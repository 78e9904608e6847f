//! The wire seam: one request out, one response (or transport error) back.
//!
//! The engine owns retry, timeout and error shaping; a [`Transport`] only
//! moves bytes. [`ReqwestTransport`] is the production implementation and
//! keeps a cookie store, so session credentials ride along with every call
//! without this crate ever seeing them.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::error::NetworkCause;

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

/// Request payloads the engine knows how to send.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// Parts are owned bytes so each attempt rebuilds an identical form.
    Multipart(Vec<FilePart>),
}

/// One file inside a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Raw response as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// The request produced no response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub cause: NetworkCause,
    pub message: String,
}

impl TransportError {
    pub fn new(cause: NetworkCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport with a persistent cookie jar.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| {
                TransportError::new(
                    NetworkCause::Other,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing client. It should have its cookie store enabled, or
    /// session cookies will not be carried between calls.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .header(ACCEPT, "application/json, text/plain;q=0.9, */*;q=0.8");

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            None => builder,
            Some(RequestBody::Json(value)) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(value.to_string()),
            Some(RequestBody::Multipart(parts)) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let file = reqwest::multipart::Part::bytes(part.bytes.to_vec())
                        .file_name(part.file_name)
                        .mime_str(&part.content_type)
                        .map_err(|e| {
                            TransportError::new(
                                NetworkCause::Other,
                                format!("invalid content type '{}': {e}", part.content_type),
                            )
                        })?;
                    form = form.part(part.field, file);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.build(request)?.send().await.map_err(from_reqwest)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(from_reqwest)?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    TransportError::new(classify(&err), error_chain(&err))
}

fn classify(err: &reqwest::Error) -> NetworkCause {
    if connection_was_reset(err) {
        NetworkCause::Reset
    } else if err.is_connect() {
        NetworkCause::Connect
    } else if err.is_body() || err.is_decode() {
        NetworkCause::Body
    } else if err.is_request() {
        NetworkCause::Request
    } else {
        NetworkCause::Other
    }
}

fn connection_was_reset(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

/// `reqwest` puts the useful detail in the source chain; flatten it.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
