//! Batch analysis jobs: submission, status polling and the wire types they
//! share.

mod poller;
mod submit;
mod types;

pub use poller::{BatchPoller, PollConfig};
pub use submit::{BatchSubmitter, Submission, UploadFile};
pub use types::{
    AnalyzedFile, BatchJob, BatchStatus, BatchStatusReport, BatchTicket, Category, CategoryId,
    DocumentAnalysis, DuplicateDocument, FailedFile, FileAnalysisResult, QueueStats, Transition,
};
