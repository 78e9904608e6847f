//! Resilient request and batch-job orchestration for a document-management
//! client.
//!
//! The crate sits between a UI (or the bundled `docflow` binary) and a
//! remote document API. It covers one upload flow end to end:
//!
//! - [`engine`]: every call goes through [`RequestEngine`], which bounds each
//!   attempt with a timeout, retries 408/429 and connection-level failures
//!   with exponential backoff, negotiates the response body and normalizes
//!   failures into [`RequestError`].
//! - [`session`]: a [`SessionGuard`] collapses concurrent 401 recoveries into
//!   a single refresh call.
//! - [`batch`]: [`BatchSubmitter`] uploads a set of files as one analysis
//!   job; [`BatchPoller`] follows the job to a terminal state.
//! - [`reconcile`]: [`ResultReconciler`] turns per-file analysis results into
//!   editable state and confirms the finished files in parallel.
//!
//! [`DocflowClient`] wires all of it from a [`ClientConfig`].
//!
//! Credentials are never handled here: the production transport keeps a
//! cookie store and the server's session cookies ride along implicitly.

pub mod batch;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod resilience;
pub mod scheduler;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

mod serde_millis;

pub use batch::{
    BatchJob, BatchPoller, BatchStatus, BatchSubmitter, BatchTicket, Category, CategoryId,
    DocumentAnalysis, DuplicateDocument, FileAnalysisResult, PollConfig, Submission, UploadFile,
};
pub use client::DocflowClient;
pub use config::{ApiRoutes, ClientConfig, ConfigLoadError, UploadConfig};
pub use engine::{ApiResponse, EngineSettings, RequestDescriptor, RequestEngine, ResponseBody};
pub use error::{ClientError, NetworkCause, RequestError, RequestErrorKind};
pub use reconcile::{
    ConfirmOutcome, ConfirmReport, FileUploadState, Reconciliation, ResultReconciler,
};
pub use resilience::RetryConfig;
pub use scheduler::{Scheduler, TokioScheduler, VirtualScheduler};
pub use session::{SessionGuard, SessionInfo};
pub use transport::{ReqwestTransport, Transport};
