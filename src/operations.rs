//! Box API Operations
//!
//! This module implements the calls made against the Box API: file lookup,
//! template listing, AI extraction and metadata instance management.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::errors::{BoxError, Result};
use crate::protocol::*;
use crate::types::*;

/// Prompt used when freeform extraction is called without one
pub const DEFAULT_FREEFORM_PROMPT: &str = "Extract key metadata from this document including dates, names, amounts, and other important information.";

/// Fields requested when looking up a file
const FILE_INFO_FIELDS: &str = "id,name,size,modified_at";

/// Result of applying metadata to a single file
#[derive(Debug, Clone)]
pub struct AppliedMetadata {
    /// The metadata instance returned by Box
    pub instance: Value,
    /// True when an existing instance was updated instead of created
    pub updated: bool,
}

/// Handles all Box API operations
///
/// This struct is used internally by the Client.
pub struct Operations {
    conn: Arc<Connection>,
    retry_count: usize,
    retry_delay: u64,
}

impl Operations {
    /// Creates a new Operations handler
    pub fn new(conn: Arc<Connection>, retry_count: usize, retry_delay: u64) -> Self {
        Self {
            conn,
            retry_count: retry_count.max(1),
            retry_delay,
        }
    }

    /// Runs an API call, retrying transient failures
    ///
    /// The delay grows linearly with the attempt number.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry_count as u64 && e.is_retryable() => {
                    warn!(operation, attempt, error = %e, "retrying");
                    sleep(Duration::from_millis(self.retry_delay * attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Retrieves name, size and modification time of a file
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileItem> {
        validate_file_id(file_id)?;
        let path = format!("files/{}", file_id);
        let query = [("fields", FILE_INFO_FIELDS.to_string())];
        let body = self
            .with_retry("get_file_info", || self.conn.get(&path, &query))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Lists every template of a scope, following pagination markers
    pub async fn list_templates(&self, scope: TemplateScope) -> Result<Vec<MetadataTemplate>> {
        let path = format!("metadata_templates/{}", scope);
        let mut templates = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = match &marker {
                Some(m) => vec![("marker", m.clone())],
                None => Vec::new(),
            };
            let body = self
                .with_retry("list_templates", || self.conn.get(&path, &query))
                .await?;
            let page: TemplatePage = serde_json::from_value(body)?;
            templates.extend(page.entries);

            match page.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        info!(scope = %scope, count = templates.len(), "retrieved metadata templates");
        Ok(templates)
    }

    /// Extracts field values with a template or a custom field list
    pub async fn extract_structured(
        &self,
        file_id: &str,
        source: &StructuredSource,
    ) -> Result<Metadata> {
        validate_file_id(file_id)?;
        if let StructuredSource::Fields(fields) = source {
            if fields.is_empty() {
                return Err(BoxError::InvalidArgument(
                    "Structured extraction needs a template or at least one field".to_string(),
                ));
            }
        }

        let request = ExtractStructuredRequest::new(file_id, source);
        debug!(body = %serde_json::to_string(&request)?, "structured extraction request");
        let response = self
            .with_retry("extract_structured", || {
                self.conn.post("ai/extract_structured", &request)
            })
            .await?;

        let fields = parse_structured_answer(&response);
        if fields.is_empty() {
            warn!(file_id, "structured extraction returned no fields");
        }
        Ok(fields)
    }

    /// Extracts free-text answers to a prompt
    pub async fn extract_freeform(&self, file_id: &str, prompt: &str) -> Result<Metadata> {
        validate_file_id(file_id)?;
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_FREEFORM_PROMPT
        } else {
            prompt
        };

        let request = ExtractFreeformRequest::new(file_id, prompt);
        debug!(body = %serde_json::to_string(&request)?, "freeform extraction request");
        let response = self
            .with_retry("extract_freeform", || self.conn.post("ai/extract", &request))
            .await?;

        match answer_text(&response) {
            Some(answer) => Ok(parse_freeform_answer(&answer)),
            None => Err(BoxError::InvalidResponse(
                "No answer in extraction response".to_string(),
            )),
        }
    }

    /// Asks a question about a file and returns the raw response
    pub async fn ask(&self, file_id: &str, prompt: &str, model: Option<&str>) -> Result<Value> {
        validate_file_id(file_id)?;
        let request = AskRequest::new(file_id, prompt, model);
        self.with_retry("ask", || self.conn.post("ai/ask", &request))
            .await
    }

    /// Creates a metadata instance on a file
    ///
    /// Fails with a conflict error when the instance already exists.
    pub async fn create_metadata(
        &self,
        file_id: &str,
        target: &MetadataTarget,
        values: &Metadata,
    ) -> Result<Value> {
        validate_file_id(file_id)?;
        let path = metadata_path(file_id, target);
        self.with_retry("create_metadata", || self.conn.post(&path, values))
            .await
    }

    /// Retrieves the user fields of a metadata instance
    pub async fn get_metadata(&self, file_id: &str, target: &MetadataTarget) -> Result<Metadata> {
        validate_file_id(file_id)?;
        let path = metadata_path(file_id, target);
        let instance = self
            .with_retry("get_metadata", || self.conn.get(&path, &[]))
            .await?;
        Ok(user_fields(&instance))
    }

    /// Applies JSON-Patch operations to a metadata instance
    pub async fn update_metadata(
        &self,
        file_id: &str,
        target: &MetadataTarget,
        operations: &[PatchOperation],
    ) -> Result<Value> {
        validate_file_id(file_id)?;
        let path = metadata_path(file_id, target);
        self.with_retry("update_metadata", || self.conn.put_patch(&path, operations))
            .await
    }

    /// Writes values to a file: create, then update if the instance exists
    ///
    /// A failed read of the existing instance is treated as an empty instance,
    /// so every key is added.
    pub async fn apply_metadata(
        &self,
        file_id: &str,
        target: &MetadataTarget,
        values: &Metadata,
    ) -> Result<AppliedMetadata> {
        match self.create_metadata(file_id, target, values).await {
            Ok(instance) => {
                info!(file_id, target = %target, "created metadata");
                Ok(AppliedMetadata {
                    instance,
                    updated: false,
                })
            }
            Err(e) if e.is_conflict() => {
                debug!(file_id, target = %target, "metadata exists, switching to update");
                let existing = match self.get_metadata(file_id, target).await {
                    Ok(existing) => existing,
                    Err(get_error) => {
                        warn!(file_id, error = %get_error, "could not read existing metadata");
                        Metadata::new()
                    }
                };
                let operations = build_update_operations(&existing, values);
                let instance = self.update_metadata(file_id, target, &operations).await?;
                info!(file_id, target = %target, ops = operations.len(), "updated metadata");
                Ok(AppliedMetadata {
                    instance,
                    updated: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn metadata_path(file_id: &str, target: &MetadataTarget) -> String {
    format!(
        "files/{}/metadata/{}/{}",
        file_id,
        target.scope(),
        target.template_key()
    )
}

/// Checks that a file id is a non-empty string of digits
pub fn validate_file_id(file_id: &str) -> Result<()> {
    if file_id.is_empty() || !file_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BoxError::InvalidArgument(format!(
            "Invalid file ID: {:?}",
            file_id
        )));
    }
    Ok(())
}
