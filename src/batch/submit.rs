use std::path::Path;

use bytes::Bytes;
use tracing::info;

use super::types::{BatchTicket, DuplicateDocument};
use crate::config::{ApiRoutes, UploadConfig};
use crate::engine::{RequestDescriptor, RequestEngine};
use crate::error::{ClientError, RequestError};
use crate::transport::FilePart;

const MULTIPART_FIELD: &str = "files";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file queued for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    /// Content type is guessed from the file extension.
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        Self {
            content_type: content_type_for(&file_name).to_string(),
            file_name,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Read a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ClientError::Validation(format!("'{}' is not a file path", path.display()))
            })?;

        Ok(Self::new(file_name, bytes))
    }

    fn to_part(&self) -> FilePart {
        FilePart {
            field: MULTIPART_FIELD.to_string(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            bytes: self.bytes.clone(),
        }
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("rtf") => "application/rtf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("tif" | "tiff") => "image/tiff",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// What the server did with a submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Queued for analysis.
    Accepted(BatchTicket),
    /// Rejected because the document already exists.
    Duplicate(DuplicateDocument),
}

impl Submission {
    /// Treat a duplicate as an error.
    pub fn into_ticket(self) -> Result<BatchTicket, ClientError> {
        match self {
            Submission::Accepted(ticket) => Ok(ticket),
            Submission::Duplicate(existing) => Err(ClientError::Duplicate(existing)),
        }
    }
}

/// Uploads a set of files as one batch-analysis job.
#[derive(Debug, Clone)]
pub struct BatchSubmitter {
    engine: RequestEngine,
    route: String,
    max_files: usize,
}

impl BatchSubmitter {
    pub fn new(engine: RequestEngine, routes: &ApiRoutes, upload: &UploadConfig) -> Self {
        Self {
            engine,
            route: routes.batch_analyze.clone(),
            max_files: upload.max_batch_files,
        }
    }

    /// Upload `files` as one multipart body. Does not wait for analysis.
    pub async fn submit(&self, files: &[UploadFile]) -> Result<Submission, ClientError> {
        if files.is_empty() {
            return Err(ClientError::Validation("no files to upload".to_string()));
        }
        if files.len() > self.max_files {
            return Err(ClientError::Validation(format!(
                "{} files selected, at most {} per batch",
                files.len(),
                self.max_files
            )));
        }

        let parts = files.iter().map(UploadFile::to_part).collect();
        let descriptor = RequestDescriptor::post(&self.route).with_multipart(parts);

        match self.engine.send(&descriptor).await {
            Ok(response) => {
                let ticket: BatchTicket = response.decode()?;
                info!(
                    batch_id = %ticket.batch_id,
                    files = files.len(),
                    status = %ticket.status,
                    queue_position = ?ticket.queue_position,
                    "batch submitted"
                );
                Ok(Submission::Accepted(ticket))
            }
            Err(RequestError::Http { status: 409, body, message }) => {
                match DuplicateDocument::from_conflict_body(&body) {
                    Some(existing) => {
                        info!(title = %existing.title, "upload matches an existing document");
                        Ok(Submission::Duplicate(existing))
                    }
                    None => Err(RequestError::Http {
                        status: 409,
                        body,
                        message,
                    }
                    .into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
