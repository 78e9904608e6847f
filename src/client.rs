//! Composition root: wires transport, scheduler, session guard, engine and
//! the batch components from one [`ClientConfig`].

use std::sync::Arc;

use crate::batch::{
    BatchJob, BatchPoller, BatchSubmitter, BatchTicket, Category, FileAnalysisResult, Submission,
    UploadFile,
};
use crate::config::ClientConfig;
use crate::engine::{EngineSettings, RequestEngine};
use crate::error::{ClientError, RequestError};
use crate::reconcile::ResultReconciler;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::session::{HttpSessionBackend, SessionGuard, SessionInfo};
use crate::transport::{ReqwestTransport, Transport};

/// High-level entry point for the upload flow.
///
/// ```no_run
/// # async fn run() -> Result<(), docflow::ClientError> {
/// use docflow::{ClientConfig, DocflowClient, UploadFile};
///
/// let client = DocflowClient::new(ClientConfig::load()?)?;
/// let files = vec![UploadFile::from_path("scan.pdf").await?];
///
/// let ticket = client.submit_batch(&files).await?.into_ticket()?;
/// let results = client.poll_batch(&ticket.batch_id).await?;
///
/// let mut reconciler = client.reconciler();
/// reconciler.reconcile(results, &[]);
/// let report = reconciler.confirm_all().await?;
/// println!("{} confirmed", report.successful());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DocflowClient {
    config: ClientConfig,
    engine: RequestEngine,
    session: SessionGuard,
    submitter: BatchSubmitter,
    poller: BatchPoller,
}

impl DocflowClient {
    /// Production wiring: `reqwest` with a cookie store and tokio timers.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&config.user_agent)
            .map_err(|e| RequestError::network(e.cause, e.message))?;
        Self::with_parts(config, Arc::new(transport), Arc::new(TokioScheduler))
    }

    /// Wire the client over a caller-supplied transport and scheduler.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let settings = EngineSettings::from_config(&config)?;

        // Session calls go through an engine without a guard so a failing
        // refresh cannot trigger another refresh.
        let plain = RequestEngine::new(transport, scheduler, settings);
        let backend = HttpSessionBackend::new(plain.clone(), config.routes.clone());
        let session = SessionGuard::new(Arc::new(backend));
        let engine = plain.with_session_guard(session.clone());

        Ok(Self {
            submitter: BatchSubmitter::new(engine.clone(), &config.routes, &config.upload),
            poller: BatchPoller::new(engine.clone(), &config.routes, config.poll),
            engine,
            session,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The guarded engine, for calls outside the batch flow.
    pub fn engine(&self) -> &RequestEngine {
        &self.engine
    }

    pub fn session(&self) -> &SessionGuard {
        &self.session
    }

    pub async fn submit_batch(&self, files: &[UploadFile]) -> Result<Submission, ClientError> {
        self.submitter.submit(files).await
    }

    pub async fn poll_batch(&self, batch_id: &str) -> Result<Vec<FileAnalysisResult>, ClientError> {
        self.poller.poll(batch_id).await
    }

    pub async fn poll_batch_with_progress<F>(
        &self,
        batch_id: &str,
        on_progress: F,
    ) -> Result<Vec<FileAnalysisResult>, ClientError>
    where
        F: FnMut(&BatchJob) + Send,
    {
        self.poller.poll_with_progress(batch_id, on_progress).await
    }

    /// Poll starting from the state the submission reported.
    pub async fn poll_ticket<F>(
        &self,
        ticket: &BatchTicket,
        on_progress: F,
    ) -> Result<Vec<FileAnalysisResult>, ClientError>
    where
        F: FnMut(&BatchJob) + Send,
    {
        self.poller.drive(BatchJob::from_ticket(ticket), on_progress).await
    }

    /// A fresh reconciler bound to this client's engine.
    pub fn reconciler(&self) -> ResultReconciler {
        ResultReconciler::new(self.engine.clone(), &self.config.routes, &self.config.upload)
    }

    /// Reconcile a result set into a fresh reconciler.
    pub fn reconcile(
        &self,
        results: Vec<FileAnalysisResult>,
        available_categories: &[Category],
    ) -> (ResultReconciler, crate::reconcile::Reconciliation) {
        let mut reconciler = self.reconciler();
        let summary = reconciler.reconcile(results, available_categories);
        (reconciler, summary)
    }

    pub async fn current_session(&self) -> Result<SessionInfo, ClientError> {
        self.session.current_session().await
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        Ok(self.session.logout().await?)
    }
}
