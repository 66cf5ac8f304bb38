//! Document Categorization
//!
//! Asks Box AI which kind of business document a file is, so that extraction
//! can pick a template per document type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

use crate::client::Client;
use crate::errors::{BoxError, Result};
use crate::protocol::{answer_text, parse_json_object};
use crate::session::Session;
use crate::types::CancellationFlag;

/// Confidence assigned when the type had to be guessed from free text
const TEXT_MATCH_CONFIDENCE: f64 = 0.5;

/// Document categories recognized by the categorization prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentType {
    /// Sales contracts and deals
    #[serde(rename = "Sales Contract")]
    SalesContract,
    /// Invoices and bills
    Invoices,
    /// Tax forms and returns
    Tax,
    /// Financial statements and reports
    #[serde(rename = "Financial Report")]
    FinancialReport,
    /// Employment and HR contracts
    #[serde(rename = "Employment Contract")]
    EmploymentContract,
    /// Documents holding personal information
    #[serde(rename = "PII")]
    Pii,
    /// Anything else
    Other,
}

impl DocumentType {
    /// All categories, in prompt order
    pub const ALL: [DocumentType; 7] = [
        DocumentType::SalesContract,
        DocumentType::Invoices,
        DocumentType::Tax,
        DocumentType::FinancialReport,
        DocumentType::EmploymentContract,
        DocumentType::Pii,
        DocumentType::Other,
    ];

    /// Name used in prompts and answers
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::SalesContract => "Sales Contract",
            DocumentType::Invoices => "Invoices",
            DocumentType::Tax => "Tax",
            DocumentType::FinancialReport => "Financial Report",
            DocumentType::EmploymentContract => "Employment Contract",
            DocumentType::Pii => "PII",
            DocumentType::Other => "Other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        DocumentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| BoxError::InvalidArgument(format!("Unknown document type: {}", s)))
    }
}

/// Category assigned to a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    /// Detected document type
    pub document_type: DocumentType,
    /// Model confidence between 0 and 1
    pub confidence: f64,
    /// Short explanation from the model
    #[serde(default)]
    pub reasoning: String,
}

/// Builds the question sent to Box AI
pub fn categorization_prompt() -> String {
    let names: Vec<&str> = DocumentType::ALL.iter().map(|t| t.as_str()).collect();
    format!(
        "Analyze this document and determine which of the following document types it belongs to:\n\
         {}\n\n\
         Respond with a JSON object containing:\n\
         1. document_type: The document type from the list above\n\
         2. confidence: A number between 0 and 1 indicating your confidence in the classification\n\
         3. reasoning: A brief explanation of why you classified it this way\n\n\
         Example response:\n\
         {{\n  \"document_type\": \"Invoices\",\n  \"confidence\": 0.95,\n  \
         \"reasoning\": \"The document contains invoice number, line items, prices, and payment terms.\"\n}}",
        names.join(", ")
    )
}

fn confidence_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn guess_from_text(text: &str) -> Categorization {
    let lower = text.to_lowercase();
    let document_type = DocumentType::ALL
        .iter()
        .copied()
        .find(|t| lower.contains(&t.as_str().to_lowercase()))
        .unwrap_or(DocumentType::Other);
    Categorization {
        document_type,
        confidence: TEXT_MATCH_CONFIDENCE,
        reasoning: "Extracted from text response".to_string(),
    }
}

/// Interprets an ask response
///
/// A JSON answer with `document_type` and `confidence` is used directly. Any
/// other answer is searched for a category name. A missing answer yields
/// `Other` with zero confidence.
pub fn parse_categorization(response: &Value) -> Categorization {
    let Some(text) = answer_text(response) else {
        return Categorization {
            document_type: DocumentType::Other,
            confidence: 0.0,
            reasoning: "Could not determine document type".to_string(),
        };
    };

    if let Some(object) = parse_json_object(&text) {
        let document_type = object.get("document_type").and_then(Value::as_str);
        let confidence = object.get("confidence").and_then(confidence_of);
        if let (Some(document_type), Some(confidence)) = (document_type, confidence) {
            return Categorization {
                document_type: document_type.parse().unwrap_or(DocumentType::Other),
                confidence: confidence.clamp(0.0, 1.0),
                reasoning: object
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
        }
    }

    guess_from_text(&text)
}

/// Categorizes a single file
pub async fn categorize_document(
    client: &Client,
    file_id: &str,
    model: Option<&str>,
) -> Result<Categorization> {
    let response = client.ask(file_id, &categorization_prompt(), model).await?;
    Ok(parse_categorization(&response))
}

/// Outcome counts of a categorization run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategorizationSummary {
    /// Files that received a category
    pub categorized: usize,
    /// Files whose request failed
    pub failed: usize,
    /// True when the run stopped early
    pub cancelled: bool,
}

/// Categorizes every selected file, one at a time
///
/// Results and errors are stored in the session.
pub async fn categorize_selection(
    client: &Client,
    session: &mut Session,
    model: Option<&str>,
    cancel: &CancellationFlag,
) -> Result<CategorizationSummary> {
    let mut summary = CategorizationSummary::default();
    let files = session.selected().to_vec();

    for file in &files {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        match categorize_document(client, &file.id, model).await {
            Ok(category) => {
                info!(
                    file = %file.name,
                    document_type = %category.document_type,
                    confidence = category.confidence,
                    "categorized document"
                );
                session.record_category(&file.id, category)?;
                summary.categorized += 1;
            }
            Err(e) => {
                error!(file = %file.name, error = %e, "categorization failed");
                session.record_error(&file.id, format!("Error categorizing document: {}", e))?;
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
