//! Metadata Extraction Runs
//!
//! This module holds the extraction configuration and runs Box AI extraction
//! over the selected files, storing the results map in the session.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::categorization::DocumentType;
use crate::client::Client;
use crate::errors::{BoxError, Result};
use crate::protocol::{StructuredSource, TemplateRef};
use crate::session::Session;
use crate::templates::match_template_to_document_type;
use crate::types::{CancellationFlag, CustomField, ExtractionOutcome, FileItem, Metadata, MetadataTemplate};

/// Prompt used for freeform extraction unless configured otherwise
pub const DEFAULT_EXTRACTION_PROMPT: &str = "Extract all relevant metadata from this document.";

/// Kind of extraction to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Template or field based extraction
    #[default]
    Structured,
    /// Prompt based extraction
    Freeform,
}

/// How files of a run are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One file at a time, in selection order
    #[default]
    Sequential,
    /// Up to `batch_size` files at a time
    Parallel,
}

/// Extraction settings, loadable from a TOML file
///
/// ```toml
/// method = "structured"
/// batch_size = 5
///
/// [template]
/// template_key = "invoice"
/// scope = "enterprise"
///
/// [document_type_prompts]
/// "Other" = "Summarize the parties and dates in this document."
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Extraction method used when no document-type override applies
    pub method: ExtractionMethod,
    /// Prompt for freeform extraction
    pub freeform_prompt: String,
    /// Maximum number of files extracted at once in parallel mode
    pub batch_size: usize,
    /// Additional attempts per file after a failure
    pub max_retries: usize,
    /// Pause between attempts, in seconds
    pub retry_delay_secs: u64,
    /// Scheduling of the run
    pub mode: ProcessingMode,
    /// Template for structured extraction
    pub template: Option<TemplateRef>,
    /// Fields for structured extraction without a template
    pub custom_fields: Vec<CustomField>,
    /// Template per document type name
    pub document_type_templates: BTreeMap<String, TemplateRef>,
    /// Freeform prompt per document type name
    pub document_type_prompts: BTreeMap<String, String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            method: ExtractionMethod::Structured,
            template: None,
            custom_fields: Vec::new(),
            freeform_prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            batch_size: 5,
            max_retries: 3,
            retry_delay_secs: 2,
            mode: ProcessingMode::Sequential,
            document_type_templates: BTreeMap::new(),
            document_type_prompts: BTreeMap::new(),
        }
    }
}

/// What to send for one file
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Structured extraction
    Structured(StructuredSource),
    /// Freeform extraction with a prompt
    Freeform(String),
}

impl ExtractionConfig {
    /// Reads a configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: ExtractionConfig = toml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = toml::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Checks settings that do not depend on a particular file
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BoxError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }

        for name in self
            .document_type_templates
            .keys()
            .chain(self.document_type_prompts.keys())
        {
            name.parse::<DocumentType>()
                .map_err(|_| BoxError::InvalidConfig(format!("Unknown document type: {}", name)))?;
        }

        let has_overrides = !self.document_type_templates.is_empty()
            || !self.document_type_prompts.is_empty();
        if self.method == ExtractionMethod::Structured
            && self.template.is_none()
            && self.custom_fields.is_empty()
            && !has_overrides
        {
            return Err(BoxError::InvalidConfig(
                "Structured extraction needs a template or custom fields".to_string(),
            ));
        }

        Ok(())
    }

    /// Maps document types without an override to their best-matching template
    ///
    /// Returns the number of mappings added.
    pub fn map_document_types<I>(&mut self, document_types: I, templates: &[MetadataTemplate]) -> usize
    where
        I: IntoIterator<Item = DocumentType>,
    {
        let mut added = 0;
        for document_type in document_types {
            let name = document_type.as_str();
            if self.document_type_templates.contains_key(name)
                || self.document_type_prompts.contains_key(name)
            {
                continue;
            }
            if let Some(template) = match_template_to_document_type(document_type, templates) {
                info!(
                    document_type = name,
                    template = %template.template_key,
                    "mapped document type to template"
                );
                self.document_type_templates
                    .insert(name.to_string(), template.as_extraction_ref());
                added += 1;
            }
        }
        added
    }

    /// Decides how a file is extracted
    ///
    /// A document-type template wins over a document-type prompt, which wins
    /// over the configured method.
    pub fn strategy_for(&self, document_type: Option<DocumentType>) -> Result<Strategy> {
        if let Some(document_type) = document_type {
            let name = document_type.as_str();
            if let Some(template) = self.document_type_templates.get(name) {
                return Ok(Strategy::Structured(StructuredSource::Template(template.clone())));
            }
            if let Some(prompt) = self.document_type_prompts.get(name) {
                return Ok(Strategy::Freeform(prompt.clone()));
            }
        }

        match self.method {
            ExtractionMethod::Freeform => Ok(Strategy::Freeform(self.freeform_prompt.clone())),
            ExtractionMethod::Structured => {
                if let Some(template) = &self.template {
                    Ok(Strategy::Structured(StructuredSource::Template(template.clone())))
                } else if !self.custom_fields.is_empty() {
                    Ok(Strategy::Structured(StructuredSource::Fields(
                        self.custom_fields.clone(),
                    )))
                } else {
                    Err(BoxError::InvalidConfig(
                        "Structured extraction needs a template or custom fields".to_string(),
                    ))
                }
            }
        }
    }
}

/// Outcome counts of an extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Files with a stored result
    pub processed: usize,
    /// Files whose every attempt failed
    pub failed: usize,
    /// True when the run stopped early
    pub cancelled: bool,
}

fn is_permanent(error: &BoxError) -> bool {
    matches!(
        error,
        BoxError::ClientClosed
            | BoxError::InvalidArgument(_)
            | BoxError::InvalidConfig(_)
            | BoxError::Unauthorized { .. }
            | BoxError::NotFound(_)
    )
}

/// Extracts one file, retrying failed attempts
async fn extract_file(
    client: &Client,
    config: &ExtractionConfig,
    file: &FileItem,
    document_type: Option<DocumentType>,
) -> Result<Metadata> {
    let strategy = config.strategy_for(document_type)?;
    let attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match &strategy {
            Strategy::Structured(source) => client.extract_structured(&file.id, source).await,
            Strategy::Freeform(prompt) => client.extract_freeform(&file.id, prompt).await,
        };

        match result {
            Ok(fields) => return Ok(fields),
            Err(e) if attempt < attempts && !is_permanent(&e) => {
                warn!(
                    file = %file.name,
                    attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "retrying file"
                );
                sleep(Duration::from_secs(config.retry_delay_secs)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn record(
    session: &mut Session,
    summary: &mut ProcessingSummary,
    file: &FileItem,
    result: Result<Metadata>,
) -> Result<()> {
    match result {
        Ok(fields) => {
            info!(file = %file.name, fields = fields.len(), "extracted metadata");
            session.record_result(ExtractionOutcome {
                file_id: file.id.clone(),
                file_name: file.name.clone(),
                fields,
            })?;
            summary.processed += 1;
        }
        Err(e) => {
            error!(file = %file.name, error = %e, "extraction failed");
            session.record_error(&file.id, e.to_string())?;
            summary.failed += 1;
        }
    }
    Ok(())
}

/// Runs extraction over every selected file
///
/// Earlier results and errors are discarded first. `progress` is called with
/// the position of the file, the number of files and the file itself.
pub async fn process_files<F>(
    client: &Client,
    session: &mut Session,
    config: &ExtractionConfig,
    cancel: &CancellationFlag,
    mut progress: F,
) -> Result<ProcessingSummary>
where
    F: FnMut(usize, usize, &FileItem),
{
    config.validate()?;
    session.clear_results();

    let files = session.selected().to_vec();
    let document_types: Vec<Option<DocumentType>> = files
        .iter()
        .map(|f| session.category(&f.id).map(|c| c.document_type))
        .collect();
    let total = files.len();
    let mut summary = ProcessingSummary::default();

    info!(total, mode = ?config.mode, "starting extraction");

    match config.mode {
        ProcessingMode::Sequential => {
            for (index, (file, document_type)) in files.iter().zip(&document_types).enumerate() {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                progress(index, total, file);
                let result = extract_file(client, config, file, *document_type).await;
                record(session, &mut summary, file, result)?;
            }
        }
        ProcessingMode::Parallel => {
            let tasks = files.iter().zip(&document_types).map(|(file, document_type)| async move {
                if cancel.is_cancelled() {
                    return (file, None);
                }
                let result = extract_file(client, config, file, *document_type).await;
                (file, Some(result))
            });

            let mut completed = stream::iter(tasks).buffer_unordered(config.batch_size);
            let mut index = 0;
            while let Some((file, result)) = completed.next().await {
                match result {
                    Some(result) => {
                        progress(index, total, file);
                        index += 1;
                        record(session, &mut summary, file, result)?;
                    }
                    None => summary.cancelled = true,
                }
            }
        }
    }

    info!(
        processed = summary.processed,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "extraction finished"
    );
    Ok(summary)
}
