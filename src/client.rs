//! Box Metadata Client
//!
//! Main client struct for extracting metadata with Box AI and writing it back
//! onto files.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::connection::Connection;
use crate::errors::{BoxError, Result};
use crate::operations::{AppliedMetadata, Operations};
use crate::protocol::{PatchOperation, StructuredSource};
use crate::types::{ClientConfig, FileItem, Metadata, MetadataTarget, MetadataTemplate, TemplateScope};

/// Box client for metadata extraction and application
///
/// This client provides a high-level, async Rust API over the Box AI and
/// metadata endpoints. It handles authentication headers, timeouts, retries of
/// transient failures and error mapping.
///
/// # Example
///
/// ```no_run
/// use box_metadata::{Client, ClientConfig, Metadata, MetadataTarget};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new(ClientConfig::new("developer-token"))?;
///
///     let fields = client.extract_freeform("1234567", "Who signed this contract?").await?;
///     client.apply_metadata("1234567", &MetadataTarget::Properties, &fields).await?;
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
    ops: Arc<Operations>,
    closed: Arc<RwLock<bool>>,
}

impl Client {
    /// Creates a new client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::validate_config(&config)?;

        let conn = Arc::new(Connection::new(
            &config.api_base_url,
            &config.access_token,
            config.network_timeout,
        )?);

        let ops = Arc::new(Operations::new(
            conn,
            config.retry_count,
            config.retry_delay,
        ));

        Ok(Self {
            config,
            ops,
            closed: Arc::new(RwLock::new(false)),
        })
    }

    /// Validates the client configuration
    fn validate_config(config: &ClientConfig) -> Result<()> {
        if config.access_token.trim().is_empty() {
            return Err(BoxError::InvalidConfig(
                "An access token is required".to_string(),
            ));
        }

        let url = &config.api_base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(BoxError::InvalidConfig(format!(
                "Invalid API base URL: {}",
                url
            )));
        }

        if config.network_timeout == 0 {
            return Err(BoxError::InvalidConfig(
                "Network timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Checks if the client is closed
    async fn check_closed(&self) -> Result<()> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(BoxError::ClientClosed);
        }
        Ok(())
    }

    /// Retrieves name, size and modification time of a file
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileItem> {
        self.check_closed().await?;
        self.ops.get_file_info(file_id).await
    }

    /// Lists all metadata templates of one scope
    pub async fn list_templates(&self, scope: TemplateScope) -> Result<Vec<MetadataTemplate>> {
        self.check_closed().await?;
        self.ops.list_templates(scope).await
    }

    /// Lists enterprise templates followed by global templates
    ///
    /// A scope that fails is logged and skipped. The call only fails when no
    /// scope could be listed.
    pub async fn list_all_templates(&self) -> Result<Vec<MetadataTemplate>> {
        self.check_closed().await?;
        let mut templates = Vec::new();
        let mut last_error = None;
        let mut any_succeeded = false;

        for scope in [TemplateScope::Enterprise, TemplateScope::Global] {
            match self.ops.list_templates(scope).await {
                Ok(found) => {
                    any_succeeded = true;
                    templates.extend(found);
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "could not list templates");
                    last_error = Some(e);
                }
            }
        }

        match (any_succeeded, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(templates),
        }
    }

    /// Extracts field values conforming to a template or a custom field list
    pub async fn extract_structured(
        &self,
        file_id: &str,
        source: &StructuredSource,
    ) -> Result<Metadata> {
        self.check_closed().await?;
        self.ops.extract_structured(file_id, source).await
    }

    /// Extracts free-text answers to a prompt
    ///
    /// An empty prompt falls back to a generic extraction prompt.
    pub async fn extract_freeform(&self, file_id: &str, prompt: &str) -> Result<Metadata> {
        self.check_closed().await?;
        self.ops.extract_freeform(file_id, prompt).await
    }

    /// Asks Box AI a question about a file
    pub async fn ask(&self, file_id: &str, prompt: &str, model: Option<&str>) -> Result<Value> {
        self.check_closed().await?;
        self.ops.ask(file_id, prompt, model).await
    }

    /// Creates a metadata instance on a file
    pub async fn create_metadata(
        &self,
        file_id: &str,
        target: &MetadataTarget,
        values: &Metadata,
    ) -> Result<Value> {
        self.check_closed().await?;
        self.ops.create_metadata(file_id, target, values).await
    }

    /// Retrieves the user fields of a metadata instance
    pub async fn get_metadata(&self, file_id: &str, target: &MetadataTarget) -> Result<Metadata> {
        self.check_closed().await?;
        self.ops.get_metadata(file_id, target).await
    }

    /// Updates a metadata instance with JSON-Patch operations
    pub async fn update_metadata(
        &self,
        file_id: &str,
        target: &MetadataTarget,
        operations: &[PatchOperation],
    ) -> Result<Value> {
        self.check_closed().await?;
        self.ops.update_metadata(file_id, target, operations).await
    }

    /// Writes values onto a file, updating the instance if it already exists
    pub async fn apply_metadata(
        &self,
        file_id: &str,
        target: &MetadataTarget,
        values: &Metadata,
    ) -> Result<AppliedMetadata> {
        self.check_closed().await?;
        self.ops.apply_metadata(file_id, target, values).await
    }

    /// Closes the client
    ///
    /// After calling close, all operations will return ClientClosed error.
    /// It's safe to call close multiple times.
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        *closed = true;
    }
}
