//! Result reconciliation: turns batch analysis output into editable per-file
//! state, applies user edits, and confirms the finished files.
//!
//! Failed analyses are reported but never block the successful ones. A file
//! can only be confirmed once it has at least one category and an acceptable
//! filename; [`ResultReconciler::confirm_all`] refuses to send anything while
//! any file falls short. Confirmation fans out one request per file and waits
//! for every one of them.

mod filename;
mod state;

pub use filename::filename_error;
pub use state::FileUploadState;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::batch::{Category, CategoryId, FileAnalysisResult};
use crate::config::{ApiRoutes, UploadConfig};
use crate::engine::{RequestDescriptor, RequestEngine};
use crate::error::{ClientError, RequestError};

/// A file the server could not analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file_name: String,
    pub reason: String,
}

/// What [`ResultReconciler::reconcile`] did with a result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciliation {
    /// Files now held as editable state.
    pub analyzed: usize,
    pub failures: Vec<FileFailure>,
}

impl Reconciliation {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// A confirmed file and the id of the document it became.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedFile {
    pub temp_id: String,
    pub file_name: String,
    pub document_id: Option<Value>,
}

/// A file whose confirmation request failed. It stays in the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmFailure {
    pub temp_id: String,
    pub file_name: String,
    pub error: RequestError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

/// Per-file results of a confirmation fan-out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfirmReport {
    pub confirmed: Vec<ConfirmedFile>,
    pub failed: Vec<ConfirmFailure>,
}

impl ConfirmReport {
    pub fn successful(&self) -> usize {
        self.confirmed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn outcome(&self) -> ConfirmOutcome {
        match (self.confirmed.is_empty(), self.failed.is_empty()) {
            (_, true) => ConfirmOutcome::AllSucceeded,
            (true, false) => ConfirmOutcome::AllFailed,
            (false, false) => ConfirmOutcome::Partial,
        }
    }

    /// Whether the flow may move on: at least one file went through.
    pub fn should_continue(&self) -> bool {
        !self.confirmed.is_empty()
    }
}

/// Holds the editable files of one or more reconciled batches.
#[derive(Debug, Clone)]
pub struct ResultReconciler {
    engine: RequestEngine,
    confirm_route: String,
    upload: UploadConfig,
    categories: Vec<Category>,
    files: Vec<FileUploadState>,
}

impl ResultReconciler {
    pub fn new(engine: RequestEngine, routes: &ApiRoutes, upload: &UploadConfig) -> Self {
        Self {
            engine,
            confirm_route: routes.confirm_upload.clone(),
            upload: *upload,
            categories: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Merge a batch's results. Successful files become editable state
    /// (replacing any earlier state with the same temp id); failures are
    /// returned with their reasons.
    pub fn reconcile(
        &mut self,
        results: Vec<FileAnalysisResult>,
        available_categories: &[Category],
    ) -> Reconciliation {
        self.categories = available_categories.to_vec();
        let known: Vec<CategoryId> = self.categories.iter().map(|c| c.id.clone()).collect();

        let mut summary = Reconciliation::default();
        for result in results {
            match result {
                FileAnalysisResult::Success(file) => {
                    let state = FileUploadState::seed(file, &known, self.upload.max_filename_len);
                    self.files.retain(|existing| existing.temp_id() != state.temp_id());
                    self.files.push(state);
                    summary.analyzed += 1;
                }
                FileAnalysisResult::Failure(file) => {
                    warn!(
                        file = %file.original_filename,
                        reason = %file.error,
                        "file analysis failed"
                    );
                    summary.failures.push(FileFailure {
                        file_name: file.original_filename,
                        reason: file.error,
                    });
                }
            }
        }

        info!(
            analyzed = summary.analyzed,
            failed = summary.failed(),
            "analysis results reconciled"
        );
        summary
    }

    pub fn files(&self) -> &[FileUploadState] {
        &self.files
    }

    pub fn file(&self, temp_id: &str) -> Option<&FileUploadState> {
        self.files.iter().find(|f| f.temp_id() == temp_id)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files that would block [`confirm_all`](Self::confirm_all).
    pub fn invalid_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_ready()).count()
    }

    /// Select or deselect a category. Returns whether it is selected
    /// afterwards.
    ///
    /// Only additions are checked against the available categories; a file
    /// can always drop what it already holds.
    pub fn toggle_category(&mut self, temp_id: &str, id: CategoryId) -> Result<bool, ClientError> {
        let adding = !self.file_mut(temp_id)?.selected_categories().contains(&id);
        if adding && !self.categories.is_empty() && !self.categories.iter().any(|c| c.id == id) {
            return Err(ClientError::Validation(format!("unknown category {id}")));
        }
        Ok(self.file_mut(temp_id)?.toggle_category(id))
    }

    pub fn set_primary(&mut self, temp_id: &str, id: CategoryId) -> Result<(), ClientError> {
        if self.file_mut(temp_id)?.set_primary(&id) {
            Ok(())
        } else {
            Err(ClientError::Validation(format!(
                "category {id} must be selected before it can be primary"
            )))
        }
    }

    /// Store a new filename. The returned error (if any) is also kept on the
    /// file and blocks confirmation until fixed.
    pub fn edit_filename(
        &mut self,
        temp_id: &str,
        name: &str,
    ) -> Result<Option<String>, ClientError> {
        let max_len = self.upload.max_filename_len;
        Ok(self
            .file_mut(temp_id)?
            .set_filename(name, max_len)
            .map(str::to_string))
    }

    /// Returns `false` for blank or already present keywords.
    pub fn add_keyword(&mut self, temp_id: &str, keyword: &str) -> Result<bool, ClientError> {
        Ok(self.file_mut(temp_id)?.add_keyword(keyword))
    }

    pub fn remove_keyword(&mut self, temp_id: &str, keyword: &str) -> Result<bool, ClientError> {
        Ok(self.file_mut(temp_id)?.remove_keyword(keyword))
    }

    /// Drop one file without confirming it.
    pub fn discard_file(&mut self, temp_id: &str) -> Option<FileUploadState> {
        let index = self.files.iter().position(|f| f.temp_id() == temp_id)?;
        Some(self.files.remove(index))
    }

    /// Drop every pending file. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.files.len();
        self.files.clear();
        dropped
    }

    /// Confirm every pending file in parallel.
    ///
    /// Nothing is sent while any file lacks a category or has a filename
    /// error. Confirmed files are removed; failed ones stay for another try.
    pub async fn confirm_all(&mut self) -> Result<ConfirmReport, ClientError> {
        if self.files.is_empty() {
            return Err(ClientError::Validation("no files to confirm".to_string()));
        }
        let invalid = self.invalid_count();
        if invalid > 0 {
            return Err(ClientError::InvalidFiles { count: invalid });
        }

        let requests: Vec<RequestDescriptor> = self
            .files
            .iter()
            .map(|f| {
                RequestDescriptor::post(&self.confirm_route).with_json(f.confirmation_payload())
            })
            .collect();

        let engine = &self.engine;
        let outcomes = join_all(requests.iter().map(|request| engine.send(request))).await;

        let mut report = ConfirmReport::default();
        for (file, outcome) in self.files.iter().zip(outcomes) {
            match outcome {
                Ok(response) => report.confirmed.push(ConfirmedFile {
                    temp_id: file.temp_id().to_string(),
                    file_name: file.filename().trim().to_string(),
                    document_id: response.body.as_json().and_then(|body| body.get("id")).cloned(),
                }),
                Err(error) => {
                    warn!(temp_id = %file.temp_id(), error = %error, "confirmation failed");
                    report.failed.push(ConfirmFailure {
                        temp_id: file.temp_id().to_string(),
                        file_name: file.filename().trim().to_string(),
                        error,
                    });
                }
            }
        }

        self.files
            .retain(|f| !report.confirmed.iter().any(|c| c.temp_id == f.temp_id()));

        info!(
            confirmed = report.successful(),
            failed = report.failed_count(),
            outcome = ?report.outcome(),
            "confirmation finished"
        );
        Ok(report)
    }

    fn file_mut(&mut self, temp_id: &str) -> Result<&mut FileUploadState, ClientError> {
        self.files
            .iter_mut()
            .find(|f| f.temp_id() == temp_id)
            .ok_or_else(|| ClientError::Validation(format!("no pending file '{temp_id}'")))
    }
}
