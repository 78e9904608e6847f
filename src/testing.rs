//! In-memory transport for exercising the engine without a network.
//!
//! A [`ScriptedTransport`] answers every request through a closure that sees
//! the request and how many earlier requests hit the same path, and keeps a
//! log of everything it was asked to send.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::NetworkCause;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// What the scripted server does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Response(HttpResponse),
    Error(TransportError),
    /// Answer after a delay (measured on the tokio clock).
    Delayed(Duration, Box<Reply>),
    /// Never answer.
    Hang,
}

impl Reply {
    pub fn json(status: u16, value: Value) -> Self {
        Reply::Response(HttpResponse {
            status,
            content_type: Some("application/json".into()),
            body: Bytes::from(value.to_string()),
        })
    }

    pub fn text(status: u16, text: &str) -> Self {
        Reply::Response(HttpResponse {
            status,
            content_type: Some("text/plain".into()),
            body: Bytes::copy_from_slice(text.as_bytes()),
        })
    }

    pub fn status(status: u16) -> Self {
        Reply::Response(HttpResponse {
            status,
            content_type: None,
            body: Bytes::new(),
        })
    }

    pub fn network(cause: NetworkCause, message: &str) -> Self {
        Reply::Error(TransportError::new(cause, message))
    }

    pub fn after(self, delay: Duration) -> Self {
        Reply::Delayed(delay, Box::new(self))
    }
}

type Handler = dyn Fn(&HttpRequest, usize) -> Reply + Send + Sync;

pub struct ScriptedTransport {
    handler: Box<Handler>,
    log: Mutex<Vec<HttpRequest>>,
    per_path: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    /// `handler` receives the request and the number of earlier requests to
    /// the same URL path.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, usize) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            per_path: Mutex::new(HashMap::new()),
        }
    }

    /// Every request answered with the same reply.
    pub fn always(reply: Reply) -> Self {
        Self::new(move |_, _| reply.clone())
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Requests whose URL path ends with `suffix`.
    pub fn calls_to(&self, suffix: &str) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.url.path().ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let seen = {
            let mut per_path = self.per_path.lock().unwrap_or_else(PoisonError::into_inner);
            let counter = per_path.entry(request.url.path().to_string()).or_insert(0);
            let seen = *counter;
            *counter += 1;
            seen
        };
        let reply = (self.handler)(&request, seen);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        resolve(reply).await
    }
}

async fn resolve(mut reply: Reply) -> Result<HttpResponse, TransportError> {
    loop {
        match reply {
            Reply::Response(response) => return Ok(response),
            Reply::Error(err) => return Err(err),
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            Reply::Hang => std::future::pending::<()>().await,
        }
    }
}
