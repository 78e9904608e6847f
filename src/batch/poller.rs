use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{BatchJob, BatchStatus, BatchStatusReport, FileAnalysisResult, Transition};
use crate::config::ApiRoutes;
use crate::engine::{RequestDescriptor, RequestEngine};
use crate::error::ClientError;
use crate::resilience::RetryConfig;

/// How often and how long to poll a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Wait between two status queries.
    #[serde(with = "crate::serde_millis")]
    pub interval: Duration,
    /// Status queries before giving up, transient failures included.
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Drives one batch from its current state to a terminal one.
///
/// Each status query is a single engine attempt; transient failures
/// (network, timeout, 408/429) burn one poll and the loop carries on. Any
/// other failure ends the loop.
#[derive(Debug, Clone)]
pub struct BatchPoller {
    engine: RequestEngine,
    routes: ApiRoutes,
    config: PollConfig,
}

impl BatchPoller {
    pub fn new(engine: RequestEngine, routes: &ApiRoutes, config: PollConfig) -> Self {
        Self {
            engine,
            routes: routes.clone(),
            config,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll until the batch completes and return its per-file results.
    pub async fn poll(&self, batch_id: &str) -> Result<Vec<FileAnalysisResult>, ClientError> {
        self.poll_with_progress(batch_id, |_| {}).await
    }

    /// Like [`poll`](Self::poll), calling `on_progress` after every applied
    /// status report.
    pub async fn poll_with_progress<F>(
        &self,
        batch_id: &str,
        on_progress: F,
    ) -> Result<Vec<FileAnalysisResult>, ClientError>
    where
        F: FnMut(&BatchJob) + Send,
    {
        self.drive(BatchJob::new(batch_id), on_progress).await
    }

    /// Continue from an existing projection, e.g. one built from a ticket.
    pub async fn drive<F>(
        &self,
        mut job: BatchJob,
        mut on_progress: F,
    ) -> Result<Vec<FileAnalysisResult>, ClientError>
    where
        F: FnMut(&BatchJob) + Send,
    {
        let descriptor = RequestDescriptor::get(self.routes.batch_status_for(&job.id));
        let single_attempt = RetryConfig::none();
        let scheduler = self.engine.scheduler();

        for attempt in 1..=self.config.max_attempts {
            match self.engine.send_with(&descriptor, &single_attempt).await {
                Ok(response) => {
                    let report: BatchStatusReport = response.decode()?;
                    if let Transition::Advanced { from, to } = job.apply(report) {
                        debug!(batch_id = %job.id, %from, %to, "batch status changed");
                    }
                    on_progress(&job);

                    match job.status {
                        BatchStatus::Completed => return finish(job),
                        BatchStatus::Failed => {
                            let reason = job
                                .error
                                .take()
                                .unwrap_or_else(|| "batch processing failed".to_string());
                            warn!(batch_id = %job.id, %reason, "batch failed");
                            return Err(ClientError::BatchFailed {
                                batch_id: job.id,
                                reason,
                            });
                        }
                        BatchStatus::Queued | BatchStatus::Processing => {}
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        batch_id = %job.id,
                        attempt,
                        error = %err,
                        "status check failed, retrying on next poll"
                    );
                }
                Err(err) => return Err(err.into()),
            }

            if attempt < self.config.max_attempts {
                scheduler.sleep(self.config.interval).await;
            }
        }

        warn!(
            batch_id = %job.id,
            attempts = self.config.max_attempts,
            "batch did not finish in time"
        );
        Err(ClientError::PollTimeout {
            batch_id: job.id,
            attempts: self.config.max_attempts,
        })
    }
}

fn finish(mut job: BatchJob) -> Result<Vec<FileAnalysisResult>, ClientError> {
    let results = job.results.take().ok_or_else(|| {
        ClientError::InvalidResponse(format!("batch {} completed without results", job.id))
    })?;

    let failed = results.iter().filter(|r| !r.is_success()).count();
    info!(
        batch_id = %job.id,
        files = results.len(),
        failed,
        "batch completed"
    );
    Ok(results)
}
