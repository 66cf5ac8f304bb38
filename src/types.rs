//! Box API Types and Constants
//!
//! This module defines the constants, configuration and data structures
//! shared by the client, the extraction run and the metadata application.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{BoxError, Result};

/// Default Box API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.box.com/2.0";

/// Default AI model for extraction and categorization
pub const DEFAULT_AI_MODEL: &str = "azure__openai__gpt_4o_mini";

/// AI models selectable for extraction and categorization
pub const AI_MODELS: &[&str] = &[
    "azure__openai__gpt_4o_mini",
    "azure__openai__gpt_4o_2024_05_13",
    "google__gemini_2_0_flash_001",
    "google__gemini_2_0_flash_lite_preview",
    "google__gemini_1_5_flash_001",
    "google__gemini_1_5_pro_001",
    "aws__claude_3_haiku",
    "aws__claude_3_sonnet",
    "aws__claude_3_5_sonnet",
    "aws__claude_3_7_sonnet",
    "aws__titan_text_lite",
];

/// Scope of the free-form key/value metadata instance
pub const GLOBAL_SCOPE: &str = "global";

/// Template key of the free-form key/value metadata instance
pub const PROPERTIES_TEMPLATE: &str = "properties";

/// Extracted or user-supplied field values, keyed by field name
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A file in the user's selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileItem {
    /// Box file identifier
    pub id: String,
    /// File name as shown in Box
    pub name: String,
    /// Size in bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last modification timestamp (ISO 8601), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl FileItem {
    /// Creates a file item with only an id and a name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: None,
            modified_at: None,
        }
    }
}

/// Metadata template scopes that can be listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateScope {
    /// Templates defined by the user's enterprise
    Enterprise,
    /// Templates available to every Box account
    Global,
}

impl TemplateScope {
    /// Path segment used by the API
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateScope::Enterprise => "enterprise",
            TemplateScope::Global => "global",
        }
    }
}

impl fmt::Display for TemplateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where extracted values are written on a file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataTarget {
    /// The free-form `global/properties` instance
    #[default]
    Properties,
    /// An instance of a metadata template
    Template {
        /// Template scope, e.g. `enterprise` or `enterprise_12345`
        scope: String,
        /// Template key
        template_key: String,
    },
}

impl MetadataTarget {
    /// Creates a template target
    pub fn template(scope: impl Into<String>, template_key: impl Into<String>) -> Self {
        MetadataTarget::Template {
            scope: scope.into(),
            template_key: template_key.into(),
        }
    }

    /// Scope path segment
    pub fn scope(&self) -> &str {
        match self {
            MetadataTarget::Properties => GLOBAL_SCOPE,
            MetadataTarget::Template { scope, .. } => scope,
        }
    }

    /// Template key path segment
    pub fn template_key(&self) -> &str {
        match self {
            MetadataTarget::Properties => PROPERTIES_TEMPLATE,
            MetadataTarget::Template { template_key, .. } => template_key,
        }
    }

    /// True for the free-form `global/properties` instance
    pub fn is_properties(&self) -> bool {
        matches!(self, MetadataTarget::Properties)
    }
}

impl fmt::Display for MetadataTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope(), self.template_key())
    }
}

/// An option of an enum or multiSelect template field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    /// Option value
    pub key: String,
}

/// A field of a metadata template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    /// Field key used in metadata instances
    pub key: String,
    /// Field type: string, float, date, enum or multiSelect
    #[serde(rename = "type")]
    pub field_type: String,
    /// Label shown to users
    #[serde(default)]
    pub display_name: String,
    /// Field description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hidden fields are not shown to users
    #[serde(default)]
    pub hidden: bool,
    /// Options for enum and multiSelect fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
}

/// A metadata template as returned by the templates endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataTemplate {
    /// Template identifier
    #[serde(default)]
    pub id: String,
    /// Template key
    #[serde(default)]
    pub template_key: String,
    /// Template scope, e.g. `global` or `enterprise_12345`
    #[serde(default)]
    pub scope: String,
    /// Template name shown to users
    #[serde(default)]
    pub display_name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hidden templates are not shown to users
    #[serde(default)]
    pub hidden: bool,
    /// Template fields
    #[serde(default)]
    pub fields: Vec<TemplateField>,
}

impl MetadataTemplate {
    /// Returns the target for writing instances of this template
    pub fn target(&self) -> MetadataTarget {
        MetadataTarget::template(self.scope.clone(), self.template_key.clone())
    }
}

/// A custom field for structured extraction without a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    /// Field key in the extracted result
    pub key: String,
    /// Label shown to users and passed to the model
    pub display_name: String,
    /// Field type: string, float, date, enum or multiSelect
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    /// Description passed to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Extra instructions for the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Options for enum and multiSelect fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl CustomField {
    /// Creates a string field
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            field_type: default_field_type(),
            description: None,
            prompt: None,
            options: Vec::new(),
        }
    }
}

/// One entry of the results map produced by an extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Box file identifier
    pub file_id: String,
    /// File name
    pub file_name: String,
    /// Extracted field values
    pub fields: Metadata,
}

/// Shared flag that stops a batch between two files
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Reports whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Box API, without a trailing slash
    pub api_base_url: String,
    /// OAuth access token or developer token
    pub access_token: String,
    /// Timeout for a single HTTP request in milliseconds
    pub network_timeout: u64,
    /// Number of attempts for transient failures
    pub retry_count: usize,
    /// Base delay between attempts in milliseconds, multiplied by the attempt number
    pub retry_delay: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: String::new(),
            network_timeout: 60000,
            retry_count: 3,
            retry_delay: 1000,
        }
    }
}

impl ClientConfig {
    /// Creates a new client configuration with an access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Builds a configuration from environment variables
    ///
    /// `BOX_ACCESS_TOKEN` is required. `BOX_API_BASE_URL`, `BOX_NETWORK_TIMEOUT_MS`,
    /// `BOX_RETRY_COUNT` and `BOX_RETRY_DELAY_MS` override the defaults.
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("BOX_ACCESS_TOKEN").map_err(|_| {
            BoxError::InvalidConfig("BOX_ACCESS_TOKEN is not set".to_string())
        })?;

        let mut config = Self::new(access_token);
        if let Ok(url) = std::env::var("BOX_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(timeout) = env_number("BOX_NETWORK_TIMEOUT_MS")? {
            config.network_timeout = timeout;
        }
        if let Some(count) = env_number("BOX_RETRY_COUNT")? {
            config.retry_count = count as usize;
        }
        if let Some(delay) = env_number("BOX_RETRY_DELAY_MS")? {
            config.retry_delay = delay;
        }
        Ok(config)
    }

    /// Sets the API base URL
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets the network timeout in milliseconds
    pub fn with_network_timeout(mut self, timeout: u64) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Sets the retry count
    pub fn with_retry_count(mut self, count: usize) -> Self {
        self.retry_count = count;
        self
    }

    /// Sets the base retry delay in milliseconds
    pub fn with_retry_delay(mut self, delay: u64) -> Self {
        self.retry_delay = delay;
        self
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BoxError::InvalidConfig(format!("{name} must be a number, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}
