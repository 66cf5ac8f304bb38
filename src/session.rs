//! Processing Session State
//!
//! A session holds the files the user selected and everything produced for
//! them: extraction results, per-file errors, user edits and document
//! categories. Every map is keyed by file id, and only ids in the current
//! selection may appear as keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::categorization::Categorization;
use crate::errors::{BoxError, Result};
use crate::types::{ExtractionOutcome, FileItem, Metadata};

/// In-memory state of one selection and its processing results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    selected: Vec<FileItem>,
    #[serde(default)]
    results: BTreeMap<String, ExtractionOutcome>,
    #[serde(default)]
    errors: BTreeMap<String, String>,
    #[serde(default)]
    edits: BTreeMap<String, Metadata>,
    #[serde(default)]
    categories: BTreeMap<String, Categorization>,
}

impl Session {
    /// Creates an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds files to the selection, ignoring ids already selected
    ///
    /// Returns the number of files added.
    pub fn select<I>(&mut self, files: I) -> usize
    where
        I: IntoIterator<Item = FileItem>,
    {
        let mut added = 0;
        for file in files {
            if !self.is_selected(&file.id) {
                self.selected.push(file);
                added += 1;
            }
        }
        added
    }

    /// Removes a file from the selection together with everything recorded for it
    pub fn deselect(&mut self, file_id: &str) -> bool {
        let before = self.selected.len();
        self.selected.retain(|f| f.id != file_id);
        self.results.remove(file_id);
        self.errors.remove(file_id);
        self.edits.remove(file_id);
        self.categories.remove(file_id);
        self.selected.len() != before
    }

    /// Selected files in selection order
    pub fn selected(&self) -> &[FileItem] {
        &self.selected
    }

    /// Looks up a selected file
    pub fn file(&self, file_id: &str) -> Option<&FileItem> {
        self.selected.iter().find(|f| f.id == file_id)
    }

    /// Reports whether a file id is selected
    pub fn is_selected(&self, file_id: &str) -> bool {
        self.file(file_id).is_some()
    }

    fn ensure_selected(&self, file_id: &str) -> Result<()> {
        if self.is_selected(file_id) {
            Ok(())
        } else {
            Err(BoxError::InvalidArgument(format!(
                "File {} is not in the current selection",
                file_id
            )))
        }
    }

    /// Stores the extraction result of a file and clears its previous error
    pub fn record_result(&mut self, outcome: ExtractionOutcome) -> Result<()> {
        self.ensure_selected(&outcome.file_id)?;
        self.errors.remove(&outcome.file_id);
        self.results.insert(outcome.file_id.clone(), outcome);
        Ok(())
    }

    /// Stores the error of a file
    pub fn record_error(&mut self, file_id: &str, error: impl Into<String>) -> Result<()> {
        self.ensure_selected(file_id)?;
        self.errors.insert(file_id.to_string(), error.into());
        Ok(())
    }

    /// Stores the document category of a file
    pub fn record_category(&mut self, file_id: &str, category: Categorization) -> Result<()> {
        self.ensure_selected(file_id)?;
        self.categories.insert(file_id.to_string(), category);
        Ok(())
    }

    /// Overrides one field value of a file
    pub fn set_edit(&mut self, file_id: &str, field: &str, value: Value) -> Result<()> {
        self.ensure_selected(file_id)?;
        if field.trim().is_empty() {
            return Err(BoxError::InvalidArgument(
                "Field name must not be empty".to_string(),
            ));
        }
        self.edits
            .entry(file_id.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    /// Extraction result of a file
    pub fn result(&self, file_id: &str) -> Option<&ExtractionOutcome> {
        self.results.get(file_id)
    }

    /// Extraction results in selection order
    pub fn results(&self) -> impl Iterator<Item = &ExtractionOutcome> {
        self.selected
            .iter()
            .filter_map(|file| self.results.get(&file.id))
    }

    /// Error recorded for a file
    pub fn error(&self, file_id: &str) -> Option<&str> {
        self.errors.get(file_id).map(String::as_str)
    }

    /// All recorded errors, keyed by file id
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Document category of a file
    pub fn category(&self, file_id: &str) -> Option<&Categorization> {
        self.categories.get(file_id)
    }

    /// User edits of a file
    pub fn edits(&self, file_id: &str) -> Option<&Metadata> {
        self.edits.get(file_id)
    }

    /// Values to write for a file
    ///
    /// The extracted fields are overlaid with the user's edits when
    /// `use_edits` is set. Returns `None` when nothing is known for the file.
    pub fn metadata_for(&self, file_id: &str, use_edits: bool) -> Option<Metadata> {
        let mut values = self
            .results
            .get(file_id)
            .map(|outcome| outcome.fields.clone())
            .unwrap_or_default();

        if use_edits {
            if let Some(edits) = self.edits.get(file_id) {
                for (field, value) in edits {
                    values.insert(field.clone(), value.clone());
                }
            }
        }

        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    /// Forgets extraction results and errors, keeping selection and edits
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.errors.clear();
    }

    /// Writes the session to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a session from a JSON file, or starts empty when it does not exist
    ///
    /// Entries for files outside the selection are dropped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        let mut session: Session = serde_json::from_str(&data)?;
        session.prune();
        Ok(session)
    }

    fn prune(&mut self) {
        let selected: Vec<String> = self.selected.iter().map(|f| f.id.clone()).collect();
        let keep = |id: &String| selected.contains(id);

        let before = self.results.len() + self.errors.len() + self.edits.len() + self.categories.len();
        self.results.retain(|id, _| keep(id));
        self.errors.retain(|id, _| keep(id));
        self.edits.retain(|id, _| keep(id));
        self.categories.retain(|id, _| keep(id));
        let after = self.results.len() + self.errors.len() + self.edits.len() + self.categories.len();

        if before != after {
            warn!(dropped = before - after, "dropped session entries for unselected files");
        }
    }
}
