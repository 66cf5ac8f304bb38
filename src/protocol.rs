//! Box API Request and Response Shapes
//!
//! This module defines the JSON bodies sent to the Box AI and metadata
//! endpoints, and the helpers that turn the vendor's loosely shaped answers
//! into flat field maps.
//!
//! The AI extraction bodies must match the vendor contract exactly: templates
//! are referenced with `template_key` and `type: "metadata_template"`, and no
//! `ai_agent` override is sent on extraction requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CustomField, FieldOption, Metadata, MetadataTemplate};

/// Ask mode for questions about a single file
pub const SINGLE_ITEM_QA: &str = "single_item_qa";

/// Response keys that never carry extracted values
const NON_FIELD_KEYS: &[&str] = &[
    "error",
    "items",
    "response",
    "item_collection",
    "entries",
    "type",
    "id",
    "sequence_id",
    "created_at",
    "completion_reason",
    "ai_agent_info",
];

/// A file reference inside an AI request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiItem {
    /// Box file identifier
    pub id: String,
    /// Always `file`
    #[serde(rename = "type")]
    pub item_type: &'static str,
}

impl AiItem {
    /// Creates a file item
    pub fn file(id: &str) -> Self {
        Self {
            id: id.to_string(),
            item_type: "file",
        }
    }
}

/// Reference to a metadata template for structured extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Template key
    pub template_key: String,
    /// Template scope
    pub scope: String,
    /// Always `metadata_template`
    #[serde(rename = "type", default = "metadata_template_type")]
    pub ref_type: String,
}

fn metadata_template_type() -> String {
    "metadata_template".to_string()
}

impl TemplateRef {
    /// Creates a template reference
    pub fn new(scope: impl Into<String>, template_key: impl Into<String>) -> Self {
        Self {
            template_key: template_key.into(),
            scope: scope.into(),
            ref_type: metadata_template_type(),
        }
    }
}

impl MetadataTemplate {
    /// Converts the template to the reference used by structured extraction
    pub fn as_extraction_ref(&self) -> TemplateRef {
        TemplateRef::new(self.scope.clone(), self.template_key.clone())
    }
}

/// A field definition sent with structured extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractFieldSpec {
    /// Field key
    pub key: String,
    /// Field label
    pub display_name: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: String,
    /// Field description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Extra model instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Options for enum fields
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
}

impl From<&CustomField> for ExtractFieldSpec {
    fn from(field: &CustomField) -> Self {
        Self {
            key: field.key.clone(),
            display_name: field.display_name.clone(),
            field_type: field.field_type.clone(),
            description: field.description.clone(),
            prompt: field.prompt.clone(),
            options: field
                .options
                .iter()
                .map(|key| FieldOption { key: key.clone() })
                .collect(),
        }
    }
}

/// What structured extraction should fill in
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredSource {
    /// Fields of an existing metadata template
    Template(TemplateRef),
    /// Ad-hoc fields
    Fields(Vec<CustomField>),
}

/// Body of `POST /ai/extract_structured`
#[derive(Debug, Clone, Serialize)]
pub struct ExtractStructuredRequest {
    /// Files to extract from
    pub items: Vec<AiItem>,
    /// Template reference, when extracting against a template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_template: Option<TemplateRef>,
    /// Field list, when extracting custom fields
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ExtractFieldSpec>,
}

impl ExtractStructuredRequest {
    /// Builds the request for one file
    pub fn new(file_id: &str, source: &StructuredSource) -> Self {
        let (metadata_template, fields) = match source {
            StructuredSource::Template(template) => (Some(template.clone()), Vec::new()),
            StructuredSource::Fields(fields) => {
                (None, fields.iter().map(ExtractFieldSpec::from).collect())
            }
        };
        Self {
            items: vec![AiItem::file(file_id)],
            metadata_template,
            fields,
        }
    }
}

/// Body of `POST /ai/extract`
#[derive(Debug, Clone, Serialize)]
pub struct ExtractFreeformRequest {
    /// Files to extract from
    pub items: Vec<AiItem>,
    /// Extraction prompt
    pub prompt: String,
}

impl ExtractFreeformRequest {
    /// Builds the request for one file
    pub fn new(file_id: &str, prompt: &str) -> Self {
        Self {
            items: vec![AiItem::file(file_id)],
            prompt: prompt.to_string(),
        }
    }
}

/// Model selection for an ask request
#[derive(Debug, Clone, Serialize)]
pub struct AskAgent {
    /// Always `ai_agent_ask`
    #[serde(rename = "type")]
    pub agent_type: &'static str,
    /// Model used for text files
    pub basic_text: AgentModel,
}

/// Model override of an AI agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentModel {
    /// Model identifier
    pub model: String,
}

/// Body of `POST /ai/ask`
#[derive(Debug, Clone, Serialize)]
pub struct AskRequest {
    /// Always `single_item_qa`
    pub mode: &'static str,
    /// Question
    pub prompt: String,
    /// File the question is about
    pub items: Vec<AiItem>,
    /// Model override, only sent when a model was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_agent: Option<AskAgent>,
}

impl AskRequest {
    /// Builds the request for one file
    pub fn new(file_id: &str, prompt: &str, model: Option<&str>) -> Self {
        Self {
            mode: SINGLE_ITEM_QA,
            prompt: prompt.to_string(),
            items: vec![AiItem::file(file_id)],
            ai_agent: model.map(|model| AskAgent {
                agent_type: "ai_agent_ask",
                basic_text: AgentModel {
                    model: model.to_string(),
                },
            }),
        }
    }
}

/// JSON-Patch operation kinds used for metadata updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Adds a new key
    Add,
    /// Replaces the value of an existing key
    Replace,
}

/// A single JSON-Patch operation on a metadata instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// Operation kind
    pub op: PatchOp,
    /// JSON pointer to the key, e.g. `/vendor`
    pub path: String,
    /// New value
    pub value: Value,
}

/// One page of `GET /metadata_templates/{scope}`
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatePage {
    /// Templates on this page
    #[serde(default)]
    pub entries: Vec<MetadataTemplate>,
    /// Marker of the next page, absent or empty on the last page
    #[serde(default)]
    pub next_marker: Option<String>,
}

/// Escapes a key for use as a JSON pointer segment
pub fn json_pointer(key: &str) -> String {
    format!("/{}", key.replace('~', "~0").replace('/', "~1"))
}

/// Builds the update operations for an existing metadata instance
///
/// Keys already present on the instance are replaced, new keys are added.
pub fn build_update_operations(existing: &Metadata, values: &Metadata) -> Vec<PatchOperation> {
    values
        .iter()
        .map(|(key, value)| PatchOperation {
            op: if existing.contains_key(key) {
                PatchOp::Replace
            } else {
                PatchOp::Add
            },
            path: json_pointer(key),
            value: value.clone(),
        })
        .collect()
}

/// Drops the `$`-prefixed system keys of a metadata instance
pub fn user_fields(instance: &Value) -> Metadata {
    instance
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| !key.starts_with('$'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Returns the answer text of an ask or freeform extraction response
pub fn answer_text(response: &Value) -> Option<String> {
    match response.get("answer")? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Strips a surrounding Markdown code fence from a model answer
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string, e.g. "json"
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Parses a JSON object out of a model answer, tolerating code fences
pub fn parse_json_object(text: &str) -> Option<Metadata> {
    let candidate = strip_code_fence(text);
    if !(candidate.starts_with('{') && candidate.ends_with('}')) {
        return None;
    }
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Turns a freeform answer into field values
///
/// A JSON object answer is used as is; any other text is kept under
/// `extracted_text`.
pub fn parse_freeform_answer(answer: &str) -> Metadata {
    if let Some(object) = parse_json_object(answer) {
        return object;
    }
    let mut metadata = Metadata::new();
    metadata.insert(
        "extracted_text".to_string(),
        Value::String(answer.to_string()),
    );
    metadata
}

/// Extracts field values from a structured extraction response
///
/// The lookup order is: `answer` object, `answer` holding a JSON string,
/// `response.answer`, `items[0].answer`, then every top-level key that is not
/// response bookkeeping.
pub fn parse_structured_answer(response: &Value) -> Metadata {
    let Some(object) = response.as_object() else {
        return Metadata::new();
    };

    match object.get("answer") {
        Some(Value::Object(answer)) => return answer.clone(),
        Some(Value::String(text)) => {
            if let Some(parsed) = parse_json_object(text) {
                return parsed;
            }
        }
        _ => {}
    }

    if let Some(Value::Object(answer)) = object.get("response").and_then(|r| r.get("answer")) {
        return answer.clone();
    }

    if let Some(Value::Object(answer)) = object
        .get("items")
        .and_then(|items| items.get(0))
        .and_then(|item| item.get("answer"))
    {
        return answer.clone();
    }

    object
        .iter()
        .filter(|(key, _)| !NON_FIELD_KEYS.contains(&key.as_str()) && key.as_str() != "answer")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
