use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::engine::ResponseBody;

/// Server-side category identifier.
///
/// Opaque to the client: the server may send numbers or strings. Ids that
/// read as a canonical integer are written back as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(String);

impl CategoryId {
    pub fn new(id: impl Into<String>) -> Self {
        CategoryId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn as_integer(&self) -> Option<i64> {
        let value: i64 = self.0.parse().ok()?;
        (value.to_string() == self.0).then_some(value)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for CategoryId {
    fn from(value: i64) -> Self {
        CategoryId(value.to_string())
    }
}

impl From<&str> for CategoryId {
    fn from(value: &str) -> Self {
        CategoryId(value.to_string())
    }
}

impl From<String> for CategoryId {
    fn from(value: String) -> Self {
        CategoryId(value)
    }
}

impl Serialize for CategoryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_integer() {
            Some(value) => serializer.serialize_i64(value),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for CategoryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CategoryIdVisitor)
    }
}

struct CategoryIdVisitor;

impl Visitor<'_> for CategoryIdVisitor {
    type Value = CategoryId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string category id")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<CategoryId, E> {
        Ok(CategoryId(value.to_string()))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<CategoryId, E> {
        Ok(CategoryId(value.to_string()))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<CategoryId, E> {
        if value.trim().is_empty() {
            return Err(E::invalid_value(de::Unexpected::Str(value), &self));
        }
        Ok(CategoryId(value.to_string()))
    }
}

/// A category the user can assign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// Lifecycle of a batch job. Only ever moves forward:
/// `queued → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    fn stage(self) -> u8 {
        match self {
            BatchStatus::Queued => 0,
            BatchStatus::Processing => 1,
            BatchStatus::Completed | BatchStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Staying put is allowed; going back or leaving a terminal state is not.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        next == self || (!self.is_terminal() && next.stage() > self.stage())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by the batch-analyze endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTicket {
    pub batch_id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub queue_position: Option<u32>,
}

/// Queue details reported while a batch waits for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "WireQueueStats")]
pub struct QueueStats {
    pub position: Option<u32>,
    pub estimated_wait_seconds: Option<u64>,
}

/// Older servers name the position `queue_position`; either may appear.
#[derive(Deserialize)]
struct WireQueueStats {
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    queue_position: Option<u32>,
    #[serde(default)]
    estimated_wait_seconds: Option<u64>,
}

impl From<WireQueueStats> for QueueStats {
    fn from(wire: WireQueueStats) -> Self {
        QueueStats {
            position: wire.position.or(wire.queue_position),
            estimated_wait_seconds: wire.estimated_wait_seconds,
        }
    }
}

/// One batch-status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub status: BatchStatus,
    #[serde(default)]
    pub processed_files: u32,
    #[serde(default)]
    pub total_files: u32,
    #[serde(default)]
    pub current_file_name: Option<String>,
    #[serde(default)]
    pub queue_stats: Option<QueueStats>,
    #[serde(default)]
    pub results: Option<Vec<FileAnalysisResult>>,
    /// Failure reason when `status` is `failed`.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form status text; some servers put the failure reason here.
    #[serde(default)]
    pub message: Option<String>,
}

impl BatchStatusReport {
    /// `error` if set, else `message`.
    pub fn failure_reason(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}

/// What [`BatchJob::apply`] did with a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Advanced { from: BatchStatus, to: BatchStatus },
    /// The report tried to move the job backwards and was dropped.
    Ignored { reported: BatchStatus },
}

/// Client-side projection of a server batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    pub total: u32,
    pub processed: u32,
    pub current_file_name: Option<String>,
    pub queue_position: Option<u32>,
    pub estimated_wait: Option<Duration>,
    /// Present only once the job completed.
    pub results: Option<Vec<FileAnalysisResult>>,
    /// Present only once the job failed.
    pub error: Option<String>,
}

impl BatchJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: BatchStatus::Queued,
            total: 0,
            processed: 0,
            current_file_name: None,
            queue_position: None,
            estimated_wait: None,
            results: None,
            error: None,
        }
    }

    pub fn from_ticket(ticket: &BatchTicket) -> Self {
        Self {
            status: ticket.status,
            queue_position: ticket.queue_position,
            ..Self::new(ticket.batch_id.clone())
        }
    }

    /// Fold a status report into the job.
    ///
    /// Backward status moves are ignored wholesale; `processed` never exceeds
    /// `total` and never goes down.
    pub fn apply(&mut self, report: BatchStatusReport) -> Transition {
        if !self.status.can_transition_to(report.status) {
            warn!(
                batch_id = %self.id,
                current = %self.status,
                reported = %report.status,
                "ignoring backward batch status"
            );
            return Transition::Ignored {
                reported: report.status,
            };
        }

        let from = self.status;
        self.status = report.status;

        if report.total_files > 0 {
            self.total = report.total_files;
        }
        self.processed = report.processed_files.max(self.processed).min(self.total);
        self.current_file_name = report.current_file_name;

        if self.status == BatchStatus::Queued {
            let stats = report.queue_stats.unwrap_or_default();
            self.queue_position = stats.position.or(self.queue_position);
            self.estimated_wait = stats.estimated_wait_seconds.map(Duration::from_secs);
        } else {
            self.queue_position = None;
            self.estimated_wait = None;
        }

        match self.status {
            BatchStatus::Completed => {
                self.processed = self.total;
                self.results = report.results;
            }
            BatchStatus::Failed => self.error = report.error.or(report.message),
            _ => {}
        }

        if from == self.status {
            Transition::Unchanged
        } else {
            Transition::Advanced {
                from,
                to: self.status,
            }
        }
    }

    /// Fraction of files processed, 0.0 when the total is not known yet.
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.processed as f32 / self.total as f32
        }
    }
}

/// Server analysis of one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    #[serde(default)]
    pub suggested_category_ids: Vec<CategoryId>,
    /// Legacy single-category field; only a fallback seed.
    #[serde(default)]
    pub suggested_category_id: Option<CategoryId>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentAnalysis {
    /// Suggested categories: the list if present, else the legacy id.
    pub fn suggested_categories(&self) -> Vec<CategoryId> {
        if !self.suggested_category_ids.is_empty() {
            self.suggested_category_ids.clone()
        } else {
            self.suggested_category_id.clone().into_iter().collect()
        }
    }
}

/// A successfully analyzed file, parked server-side under `temp_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedFile {
    pub temp_id: String,
    pub original_filename: String,
    pub standardized_filename: String,
    pub analysis: DocumentAnalysis,
    pub batch_id: Option<String>,
}

/// A file the server could not analyze.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedFile {
    pub original_filename: String,
    pub error: String,
    pub batch_id: Option<String>,
}

/// Per-file outcome of a batch. On the wire the variant is chosen by a
/// boolean `success` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireFileResult", into = "WireFileResult")]
pub enum FileAnalysisResult {
    Success(AnalyzedFile),
    Failure(FailedFile),
}

impl FileAnalysisResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FileAnalysisResult::Success(_))
    }

    pub fn original_filename(&self) -> &str {
        match self {
            FileAnalysisResult::Success(file) => &file.original_filename,
            FileAnalysisResult::Failure(file) => &file.original_filename,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFileResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temp_id: Option<String>,
    original_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    standardized_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    analysis: Option<DocumentAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
}

impl TryFrom<WireFileResult> for FileAnalysisResult {
    type Error = String;

    fn try_from(wire: WireFileResult) -> Result<Self, Self::Error> {
        if !wire.success {
            return Ok(FileAnalysisResult::Failure(FailedFile {
                original_filename: wire.original_filename,
                error: wire.error.unwrap_or_else(|| "analysis failed".to_string()),
                batch_id: wire.batch_id,
            }));
        }

        let name = &wire.original_filename;
        let missing = |field: &str| format!("successful result for '{name}' has no {field}");
        let temp_id = wire.temp_id.ok_or_else(|| missing("temp_id"))?;
        let analysis = wire.analysis.ok_or_else(|| missing("analysis"))?;

        Ok(FileAnalysisResult::Success(AnalyzedFile {
            temp_id,
            standardized_filename: wire
                .standardized_filename
                .unwrap_or_else(|| wire.original_filename.clone()),
            original_filename: wire.original_filename,
            analysis,
            batch_id: wire.batch_id,
        }))
    }
}

impl From<FileAnalysisResult> for WireFileResult {
    fn from(result: FileAnalysisResult) -> Self {
        match result {
            FileAnalysisResult::Success(file) => WireFileResult {
                success: true,
                temp_id: Some(file.temp_id),
                original_filename: file.original_filename,
                standardized_filename: Some(file.standardized_filename),
                analysis: Some(file.analysis),
                error: None,
                batch_id: file.batch_id,
            },
            FileAnalysisResult::Failure(file) => WireFileResult {
                success: false,
                temp_id: None,
                original_filename: file.original_filename,
                standardized_filename: None,
                analysis: None,
                error: Some(file.error),
                batch_id: file.batch_id,
            },
        }
    }
}

/// The existing document a duplicate upload collided with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireDuplicate")]
pub struct DuplicateDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub title: String,
    /// Raw timestamp as sent by the server.
    pub uploaded_at: Option<String>,
}

/// The upload time goes by several names; the first present one wins.
#[derive(Deserialize)]
struct WireDuplicate {
    #[serde(default)]
    id: Option<Value>,
    title: String,
    #[serde(default)]
    uploaded_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    upload_date: Option<String>,
}

impl From<WireDuplicate> for DuplicateDocument {
    fn from(wire: WireDuplicate) -> Self {
        DuplicateDocument {
            id: wire.id,
            title: wire.title,
            uploaded_at: wire.uploaded_at.or(wire.created_at).or(wire.upload_date),
        }
    }
}

impl DuplicateDocument {
    /// Upload time, accepting RFC 3339 or a naive UTC timestamp.
    pub fn uploaded_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.uploaded_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Find a duplicate-document payload in a 409 body.
    ///
    /// Accepts the document under `existing_document` (or `existing` /
    /// `duplicate`) either at the top level or inside `detail`.
    pub fn from_conflict_body(body: &ResponseBody) -> Option<Self> {
        let root = body.as_json()?;
        let candidates = [Some(root), root.get("detail")];

        candidates.into_iter().flatten().find_map(|scope| {
            ["existing_document", "existing", "duplicate"]
                .iter()
                .filter_map(|key| scope.get(*key))
                .find_map(|doc| serde_json::from_value::<DuplicateDocument>(doc.clone()).ok())
        })
    }
}
