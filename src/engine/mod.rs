//! Request engine: one logical request in, one normalized result out.
//!
//! The engine resolves the target URL, bounds every attempt with a timeout,
//! retries retryable failures with exponential backoff, negotiates the
//! response body, and turns every failure into a [`RequestError`]. With a
//! [`SessionGuard`] attached, a 401 on a credentialed request triggers one
//! shared session refresh and a single replay.

mod descriptor;
mod response;

pub use descriptor::RequestDescriptor;
pub use response::{ApiResponse, ResponseBody};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info};
use url::Url;

use crate::config::{ClientConfig, ConfigLoadError};
use crate::error::{NetworkCause, RequestError};
use crate::resilience::{execute_with_retry, is_retryable_error, RetryConfig};
use crate::scheduler::Scheduler;
use crate::session::SessionGuard;
use crate::transport::{HttpRequest, Transport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the API lives and how hard to try.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub base_url: Url,
    /// Bound for a single attempt.
    pub timeout: Duration,
    /// Default budget; callers can override per request.
    pub retry: RetryConfig,
}

impl EngineSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigLoadError> {
        Ok(Self {
            base_url: config.parsed_base_url()?,
            timeout: config.request_timeout,
            retry: config.retry,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Cheap to clone; clones share the transport, scheduler and session guard.
#[derive(Clone)]
pub struct RequestEngine {
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    session: Option<SessionGuard>,
    settings: EngineSettings,
}

impl fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEngine")
            .field("settings", &self.settings)
            .field("session_guard", &self.session.is_some())
            .finish()
    }
}

impl RequestEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            transport,
            scheduler,
            session: None,
            settings,
        }
    }

    /// Attach the guard that handles 401 recovery.
    pub fn with_session_guard(mut self, guard: SessionGuard) -> Self {
        self.session = Some(guard);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Send with the engine's default retry budget.
    pub async fn send(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, RequestError> {
        self.send_with(descriptor, &self.settings.retry).await
    }

    /// Send with an explicit retry budget.
    pub async fn send_with(
        &self,
        descriptor: &RequestDescriptor,
        retry: &RetryConfig,
    ) -> Result<ApiResponse, RequestError> {
        let request = self.build_request(descriptor)?;

        let outcome = execute_with_retry(
            retry,
            self.scheduler.as_ref(),
            is_retryable_error,
            |attempt| {
                let request = request.clone();
                async move {
                    debug!(
                        method = %request.method,
                        url = %request.url,
                        attempt = attempt + 1,
                        "sending request"
                    );
                    if attempt > 0 {
                        counter!("docflow_request_retries_total").increment(1);
                    }
                    self.attempt_with_refresh(descriptor, request).await
                }
            },
        )
        .await;

        if let Err(err) = &outcome.result {
            counter!("docflow_request_failures_total", "kind" => err.kind().as_str()).increment(1);
            debug!(
                path = %descriptor.path,
                attempts = outcome.attempts,
                error = %err,
                "request failed"
            );
        }

        outcome.into_result()
    }

    /// Full target address: base URL, path, then query parameters.
    pub fn url_for(&self, descriptor: &RequestDescriptor) -> Result<Url, RequestError> {
        let base = self.settings.base_url.as_str().trim_end_matches('/');
        let path = descriptor.path.trim_start_matches('/');

        let mut url = Url::parse(&format!("{base}/{path}")).map_err(|e| {
            RequestError::network(
                NetworkCause::Other,
                format!("invalid request url for '{}': {e}", descriptor.path),
            )
        })?;

        if !descriptor.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                descriptor
                    .query
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            );
        }

        Ok(url)
    }

    fn build_request(&self, descriptor: &RequestDescriptor) -> Result<HttpRequest, RequestError> {
        Ok(HttpRequest {
            method: descriptor.method.clone(),
            url: self.url_for(descriptor)?,
            headers: Vec::new(),
            body: descriptor.effective_body().cloned(),
        })
    }

    /// One attempt; a 401 on a credentialed call gets one refresh-and-replay.
    async fn attempt_with_refresh(
        &self,
        descriptor: &RequestDescriptor,
        request: HttpRequest,
    ) -> Result<ApiResponse, RequestError> {
        let guard = match (&self.session, descriptor.requires_auth) {
            (Some(guard), true) => guard,
            _ => return self.attempt(request).await,
        };

        match self.attempt(request.clone()).await {
            Err(err) if err.status() == Some(401) => {
                if guard.refresh().await {
                    info!(path = %descriptor.path, "session refreshed, replaying request");
                    self.attempt(request).await
                } else {
                    Err(err)
                }
            }
            other => other,
        }
    }

    async fn attempt(&self, request: HttpRequest) -> Result<ApiResponse, RequestError> {
        counter!("docflow_request_attempts_total").increment(1);

        let attempt = tokio::time::timeout(self.settings.timeout, self.transport.execute(request));
        let response = match attempt.await {
            Err(_) => return Err(RequestError::timeout(self.settings.timeout)),
            Ok(Err(err)) => return Err(RequestError::network(err.cause, err.message)),
            Ok(Ok(response)) => response,
        };

        let body = ResponseBody::from_bytes(response.content_type.as_deref(), &response.body);
        if (200..300).contains(&response.status) {
            Ok(ApiResponse {
                status: response.status,
                body,
            })
        } else {
            Err(RequestError::http(response.status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestErrorKind;
    use crate::scheduler::VirtualScheduler;
    use crate::testing::{Reply, ScriptedTransport};
    use crate::transport::RequestBody;
    use serde_json::json;

    fn engine_with(
        transport: Arc<ScriptedTransport>,
        scheduler: Arc<VirtualScheduler>,
    ) -> RequestEngine {
        let settings = EngineSettings::new(Url::parse("https://docs.example.com/api/").unwrap())
            .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(100)));
        RequestEngine::new(transport, scheduler, settings)
    }

    #[test]
    fn url_keeps_base_path_and_appends_query() {
        let engine = engine_with(
            Arc::new(ScriptedTransport::always(Reply::status(204))),
            Arc::new(VirtualScheduler::new()),
        );
        let descriptor =
            RequestDescriptor::get("/documents/batch-status/b1").with_query("verbose", "1");

        let url = engine.url_for(&descriptor).unwrap();
        assert_eq!(
            url.as_str(),
            "https://docs.example.com/api/documents/batch-status/b1?verbose=1"
        );
    }

    #[tokio::test]
    async fn success_returns_parsed_body() {
        let transport = Arc::new(ScriptedTransport::always(Reply::json(
            200,
            json!({ "ok": true }),
        )));
        let engine = engine_with(transport.clone(), Arc::new(VirtualScheduler::new()));

        let response = engine.send(&RequestDescriptor::get("/auth/me")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, ResponseBody::Json(json!({ "ok": true })));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried_for_any_budget() {
        for retries in [0, 1, 3, 7] {
            let transport = Arc::new(ScriptedTransport::always(Reply::json(
                500,
                json!({ "detail": "database unavailable" }),
            )));
            let scheduler = Arc::new(VirtualScheduler::new());
            let engine = engine_with(transport.clone(), scheduler.clone());

            let err = engine
                .send_with(
                    &RequestDescriptor::get("/documents"),
                    &RetryConfig::default().with_max_retries(retries),
                )
                .await
                .unwrap_err();

            assert_eq!(err.kind(), RequestErrorKind::Http);
            assert_eq!(err.status(), Some(500));
            assert_eq!(err.message(), "database unavailable");
            assert_eq!(transport.request_count(), 1, "budget {retries}");
            assert!(scheduler.sleeps().is_empty());
        }
    }

    #[tokio::test]
    async fn rate_limited_requests_use_the_whole_budget() {
        for retries in [0, 1, 3, 5] {
            let transport = Arc::new(ScriptedTransport::always(Reply::status(429)));
            let scheduler = Arc::new(VirtualScheduler::new());
            let engine = engine_with(transport.clone(), scheduler.clone());

            let err = engine
                .send_with(
                    &RequestDescriptor::get("/documents"),
                    &RetryConfig::default()
                        .with_max_retries(retries)
                        .with_base_delay(Duration::from_millis(100)),
                )
                .await
                .unwrap_err();

            assert_eq!(err.status(), Some(429));
            assert_eq!(transport.request_count(), retries as usize + 1);

            let expected: Vec<Duration> = (0..retries)
                .map(|n| Duration::from_millis(100 * 2u64.pow(n)))
                .collect();
            assert_eq!(scheduler.sleeps(), expected);
        }
    }

    #[tokio::test]
    async fn intermediate_success_stops_retrying() {
        let transport = Arc::new(ScriptedTransport::new(|_, seen| match seen {
            0 => Reply::status(408),
            1 => Reply::network(NetworkCause::Connect, "connection refused"),
            _ => Reply::json(200, json!({ "done": true })),
        }));
        let engine = engine_with(transport.clone(), Arc::new(VirtualScheduler::new()));

        let response = engine.send(&RequestDescriptor::get("/documents")).await.unwrap();
        assert_eq!(response.body.as_json(), Some(&json!({ "done": true })));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn unclassified_transport_failure_stops_immediately() {
        let transport = Arc::new(ScriptedTransport::always(Reply::network(
            NetworkCause::Other,
            "certificate verify failed",
        )));
        let engine = engine_with(transport.clone(), Arc::new(VirtualScheduler::new()));

        let err = engine.send(&RequestDescriptor::get("/documents")).await.unwrap_err();
        assert_eq!(err.kind(), RequestErrorKind::Network);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempts_time_out_and_retry() {
        let transport = Arc::new(ScriptedTransport::always(Reply::Hang));
        let settings = EngineSettings::new(Url::parse("https://docs.example.com").unwrap())
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryConfig::default().with_max_retries(1));
        let engine =
            RequestEngine::new(transport.clone(), Arc::new(VirtualScheduler::new()), settings);

        let err = engine.send(&RequestDescriptor::get("/slow")).await.unwrap_err();
        assert_eq!(err, RequestError::timeout(Duration::from_secs(5)));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn json_bodies_are_sent_and_dropped_for_get() {
        let transport = Arc::new(ScriptedTransport::always(Reply::status(204)));
        let engine = engine_with(transport.clone(), Arc::new(VirtualScheduler::new()));

        let confirm = RequestDescriptor::post("/documents/confirm-upload")
            .with_json(json!({ "temp_id": "t" }));
        engine.send(&confirm).await.unwrap();
        engine
            .send(&RequestDescriptor::get("/documents").with_json(json!({ "x": 1 })))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[0].body,
            Some(RequestBody::Json(json!({ "temp_id": "t" })))
        );
        assert_eq!(requests[1].body, None);
        assert!(requests.iter().all(|r| r.headers.is_empty()));
    }

    #[tokio::test]
    async fn unauthorized_without_guard_surfaces_immediately() {
        let transport = Arc::new(ScriptedTransport::always(Reply::json(
            401,
            json!({ "detail": "Not authenticated" }),
        )));
        let engine = engine_with(transport.clone(), Arc::new(VirtualScheduler::new()));

        let err = engine.send(&RequestDescriptor::get("/documents")).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.message(), "Not authenticated");
        assert_eq!(transport.request_count(), 1);
    }
}
