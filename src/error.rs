use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::batch::DuplicateDocument;
use crate::config::ConfigLoadError;
use crate::engine::ResponseBody;

/// Discriminant of a [`RequestError`], for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestErrorKind {
    Http,
    Network,
    Timeout,
}

impl RequestErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestErrorKind::Http => "http",
            RequestErrorKind::Network => "network",
            RequestErrorKind::Timeout => "timeout",
        }
    }
}

/// Why a request never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkCause {
    /// Could not establish a connection (DNS, refused, TLS handshake).
    Connect,
    /// The peer reset or closed the connection mid-exchange.
    Reset,
    /// Generic fetch-layer failure while sending the request.
    Request,
    /// The response body could not be read.
    Body,
    /// Anything else (malformed URL, client misconfiguration).
    Other,
}

/// A failed request, normalized at the engine boundary.
///
/// Transport exceptions never escape the engine in any other shape; callers
/// match on the variant instead of probing for optional fields.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Http {
        status: u16,
        body: ResponseBody,
        message: String,
    },
    /// No response reached the client.
    #[error("{message}")]
    Network { cause: NetworkCause, message: String },
    /// A single attempt exceeded its time bound.
    #[error("{message}")]
    Timeout { after: Duration, message: String },
}

impl RequestError {
    /// Build an `Http` error, pulling a readable message out of the body when
    /// the server used one of the conventional fields.
    pub fn http(status: u16, body: ResponseBody) -> Self {
        let message =
            error_message_from_body(&body).unwrap_or_else(|| default_status_message(status));
        RequestError::Http {
            status,
            body,
            message,
        }
    }

    pub fn network(cause: NetworkCause, message: impl Into<String>) -> Self {
        RequestError::Network {
            cause,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        RequestError::Timeout {
            after,
            message: format!("request timed out after {} ms", after.as_millis()),
        }
    }

    pub fn kind(&self) -> RequestErrorKind {
        match self {
            RequestError::Http { .. } => RequestErrorKind::Http,
            RequestError::Network { .. } => RequestErrorKind::Network,
            RequestError::Timeout { .. } => RequestErrorKind::Timeout,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RequestError::Http { message, .. }
            | RequestError::Network { message, .. }
            | RequestError::Timeout { message, .. } => message,
        }
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the engine's retry policy would retry this failure.
    pub fn is_retryable(&self) -> bool {
        crate::resilience::is_retryable_error(self)
    }

    /// Failures that say nothing about the remote job itself: the request
    /// never got a definitive answer, or was throttled. A local
    /// misconfiguration (`NetworkCause::Other`) will not heal by waiting.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Network { cause, .. } => *cause != NetworkCause::Other,
            RequestError::Timeout { .. } => true,
            RequestError::Http { status, .. } => crate::resilience::is_retryable_status(*status),
        }
    }
}

/// Best-effort extraction of a human-readable message from an error body.
///
/// Looks at `message` and `detail`; `detail` may be a string, an object with
/// its own `message`, or a list of `{ "msg": .. }` validation entries.
pub fn error_message_from_body(body: &ResponseBody) -> Option<String> {
    match body {
        ResponseBody::Json(value) => message_from_value(value),
        ResponseBody::Text(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty() && trimmed.len() <= 512).then(|| trimmed.to_string())
        }
        ResponseBody::Empty => None,
    }
}

fn message_from_value(value: &Value) -> Option<String> {
    let object = value.as_object()?;

    if let Some(Value::String(message)) = object.get("message") {
        return Some(message.clone());
    }

    match object.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Object(_) => message_from_value(object.get("detail")?),
        Value::Array(entries) => {
            let messages: Vec<&str> = entries
                .iter()
                .filter_map(|entry| entry.get("msg").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}

fn default_status_message(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}

/// Everything the orchestration layer can fail with.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network, timeout or HTTP failure after the engine's policy ran out.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Client-side validation; never sent to the server.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Confirmation refused because some files are incomplete.
    #[error("{count} file(s) need a category and a valid filename before confirming")]
    InvalidFiles { count: usize },
    /// The upload matched a document that already exists.
    #[error("document already exists: {}", .0.title)]
    Duplicate(DuplicateDocument),
    /// The server reported the batch job as failed.
    #[error("batch {batch_id} failed: {reason}")]
    BatchFailed { batch_id: String, reason: String },
    /// The poll loop hit its attempt cap before the job finished.
    #[error("batch {batch_id} did not finish after {attempts} status checks")]
    PollTimeout { batch_id: String, attempts: u32 },
    /// A 2xx response whose payload did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
}

impl ClientError {
    /// The underlying request failure, if this error came off the wire.
    pub fn as_request_error(&self) -> Option<&RequestError> {
        match self {
            ClientError::Request(err) => Some(err),
            _ => None,
        }
    }
}
