use serde_json::{json, Value};

use super::filename::filename_error;
use crate::batch::{AnalyzedFile, CategoryId, DocumentAnalysis};

/// Editable state for one analyzed file awaiting confirmation.
///
/// The primary category is always one of the selected categories.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUploadState {
    temp_id: String,
    original_filename: String,
    batch_id: Option<String>,
    analysis: DocumentAnalysis,
    selected_categories: Vec<CategoryId>,
    primary_category: Option<CategoryId>,
    keywords: Vec<String>,
    filename: String,
    filename_error: Option<String>,
}

impl FileUploadState {
    /// Seed from a successful analysis. `known` restricts the suggested
    /// categories when non-empty.
    pub(crate) fn seed(file: AnalyzedFile, known: &[CategoryId], max_filename_len: usize) -> Self {
        let mut selected: Vec<CategoryId> = Vec::new();
        for id in file.analysis.suggested_categories() {
            if (known.is_empty() || known.contains(&id)) && !selected.contains(&id) {
                selected.push(id);
            }
        }

        let mut keywords: Vec<String> = Vec::new();
        for keyword in &file.analysis.keywords {
            push_keyword(&mut keywords, keyword);
        }

        let filename = file.standardized_filename;
        Self {
            filename_error: filename_error(&filename, max_filename_len),
            filename,
            primary_category: selected.first().cloned(),
            selected_categories: selected,
            keywords,
            temp_id: file.temp_id,
            original_filename: file.original_filename,
            batch_id: file.batch_id,
            analysis: file.analysis,
        }
    }

    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn analysis(&self) -> &DocumentAnalysis {
        &self.analysis
    }

    pub fn selected_categories(&self) -> &[CategoryId] {
        &self.selected_categories
    }

    pub fn primary_category(&self) -> Option<&CategoryId> {
        self.primary_category.as_ref()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn filename_error(&self) -> Option<&str> {
        self.filename_error.as_deref()
    }

    /// Has at least one category and an acceptable filename.
    pub fn is_ready(&self) -> bool {
        !self.selected_categories.is_empty() && self.filename_error.is_none()
    }

    /// Add or remove `id`. Returns whether it is selected afterwards.
    pub(crate) fn toggle_category(&mut self, id: CategoryId) -> bool {
        if let Some(index) = self.selected_categories.iter().position(|c| *c == id) {
            self.selected_categories.remove(index);
            if self.primary_category.as_ref() == Some(&id) {
                self.primary_category = self.selected_categories.first().cloned();
            }
            false
        } else {
            if self.primary_category.is_none() {
                self.primary_category = Some(id.clone());
            }
            self.selected_categories.push(id);
            true
        }
    }

    /// Returns `false` (and changes nothing) unless `id` is selected.
    pub(crate) fn set_primary(&mut self, id: &CategoryId) -> bool {
        if self.selected_categories.contains(id) {
            self.primary_category = Some(id.clone());
            true
        } else {
            false
        }
    }

    /// Store the edit and its validation result together.
    pub(crate) fn set_filename(&mut self, name: &str, max_len: usize) -> Option<&str> {
        self.filename = name.to_string();
        self.filename_error = filename_error(name, max_len);
        self.filename_error.as_deref()
    }

    pub(crate) fn add_keyword(&mut self, keyword: &str) -> bool {
        push_keyword(&mut self.keywords, keyword)
    }

    pub(crate) fn remove_keyword(&mut self, keyword: &str) -> bool {
        let before = self.keywords.len();
        let keyword = keyword.trim();
        self.keywords.retain(|k| !k.eq_ignore_ascii_case(keyword));
        self.keywords.len() != before
    }

    /// Body of the confirm-upload request.
    pub(crate) fn confirmation_payload(&self) -> Value {
        json!({
            "temp_id": self.temp_id,
            "title": self.filename.trim(),
            "category_ids": self.selected_categories,
            "primary_category_id": self.primary_category,
            "keywords": self.keywords,
        })
    }
}

/// Trimmed, non-empty and not already present (ignoring ASCII case).
fn push_keyword(keywords: &mut Vec<String>, keyword: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() || keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
        return false;
    }
    keywords.push(keyword.to_string());
    true
}
