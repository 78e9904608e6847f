//! Session guard: single-flight credential refresh plus the cached session.
//!
//! Many parallel calls can hit 401 at once. The first one to ask for a
//! refresh starts it; everyone else awaits the same shared future, so the
//! backend sees exactly one refresh call and every waiter gets the same
//! answer. A failed refresh wipes the local session.
//!
//! The guard is an explicit value owned by the composition root and handed to
//! the request engine; there is no process-global session state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::ApiRoutes;
use crate::engine::{RequestDescriptor, RequestEngine};
use crate::error::{ClientError, RequestError};

/// The signed-in user as reported by the current-session endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireSessionInfo")]
pub struct SessionInfo {
    pub id: Value,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Servers differ in naming the id and display name; several may be present
/// at once, the first one found wins.
#[derive(Deserialize)]
struct WireSessionInfo {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<WireSessionInfo> for SessionInfo {
    type Error = String;

    fn try_from(wire: WireSessionInfo) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .or(wire.user_id)
            .ok_or_else(|| "session has no user id".to_string())?;

        Ok(SessionInfo {
            id,
            email: wire.email,
            name: wire.name.or(wire.full_name).or(wire.display_name),
            extra: wire.extra,
        })
    }
}

/// Credential lifecycle calls, kept behind a trait so the guard never depends
/// on a guarded engine (a refresh must not recurse into itself).
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn refresh(&self) -> Result<(), RequestError>;
    async fn current_session(&self) -> Result<SessionInfo, ClientError>;
    async fn logout(&self) -> Result<(), RequestError>;
}

/// Backend that talks to the session routes through a guard-less engine.
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    engine: RequestEngine,
    routes: ApiRoutes,
}

impl HttpSessionBackend {
    pub fn new(engine: RequestEngine, routes: ApiRoutes) -> Self {
        Self { engine, routes }
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn refresh(&self) -> Result<(), RequestError> {
        self.engine
            .send(&RequestDescriptor::post(&self.routes.refresh).public())
            .await
            .map(|_| ())
    }

    async fn current_session(&self) -> Result<SessionInfo, ClientError> {
        let response = self
            .engine
            .send(&RequestDescriptor::get(&self.routes.session).public())
            .await?;
        response.decode()
    }

    async fn logout(&self) -> Result<(), RequestError> {
        self.engine
            .send(&RequestDescriptor::post(&self.routes.logout).public())
            .await
            .map(|_| ())
    }
}

type SharedRefresh = Shared<BoxFuture<'static, bool>>;

struct GuardInner {
    backend: Arc<dyn SessionBackend>,
    in_flight: Mutex<Option<SharedRefresh>>,
    session: Mutex<Option<SessionInfo>>,
    refresh_calls: AtomicU64,
}

/// Cheap to clone; clones share the same in-flight refresh and session cache.
#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<GuardInner>,
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("refreshing", &self.is_refreshing())
            .field("refresh_calls", &self.refresh_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionGuard {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                backend,
                in_flight: Mutex::new(None),
                session: Mutex::new(None),
                refresh_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh credentials, joining a refresh that is already running.
    ///
    /// Returns `true` when the session is usable again. On `false` the local
    /// session has been cleared.
    pub async fn refresh(&self) -> bool {
        let pending = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    let pending = start_refresh(Arc::clone(&self.inner));
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Underlying refresh calls issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::Relaxed)
    }

    /// The current session, fetched once and then served from memory.
    pub async fn current_session(&self) -> Result<SessionInfo, ClientError> {
        if let Some(session) = self.cached_session() {
            return Ok(session);
        }

        let session = self.inner.backend.current_session().await?;
        *lock(&self.inner.session) = Some(session.clone());
        Ok(session)
    }

    pub fn cached_session(&self) -> Option<SessionInfo> {
        lock(&self.inner.session).clone()
    }

    /// Forget the cached session.
    pub fn clear(&self) {
        lock(&self.inner.session).take();
    }

    /// End the session server-side, then locally. Local state is cleared even
    /// when the server call fails.
    pub async fn logout(&self) -> Result<(), RequestError> {
        let result = self.inner.backend.logout().await;
        self.clear();
        result
    }
}

fn start_refresh(inner: Arc<GuardInner>) -> SharedRefresh {
    async move {
        inner.refresh_calls.fetch_add(1, Ordering::Relaxed);

        let refreshed = match inner.backend.refresh().await {
            Ok(()) => {
                info!("session refreshed");
                true
            }
            Err(err) => {
                warn!(error = %err, "session refresh failed, clearing local session");
                lock(&inner.session).take();
                false
            }
        };

        lock(&inner.in_flight).take();
        refreshed
    }
    .boxed()
    .shared()
}
