use reqwest::Method;
use serde_json::Value;

use crate::transport::{FilePart, RequestBody};

/// What to send, independent of where the API lives.
///
/// Descriptors are immutable once handed to the engine; every retry sends the
/// same method, path, query and body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub body: Option<RequestBody>,
    pub query: Vec<(String, String)>,
    /// Whether a 401 should trigger a session refresh and replay.
    pub requires_auth: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            requires_auth: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_multipart(mut self, parts: Vec<FilePart>) -> Self {
        self.body = Some(RequestBody::Multipart(parts));
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Mark the call as not needing credentials (no refresh on 401).
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Safe methods never carry a body, even if one was attached.
    pub fn effective_body(&self) -> Option<&RequestBody> {
        if matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS) {
            None
        } else {
            self.body.as_ref()
        }
    }
}
