//! Metadata Application
//!
//! Writes extracted (and user-edited) values back onto the selected files.
//!
//! Values pass through a preparation step before they are sent:
//!
//! 1. Placeholder values copied from prompt examples are removed
//! 2. Keys are normalized to Box field key form (`properties` only; template
//!    field keys are written as the template defines them)
//! 3. Values are coerced into something the metadata target accepts
//!
//! Files are then written one at a time. Each write creates the metadata
//! instance and falls back to a JSON-Patch update when the instance already
//! exists.

use serde::Serialize;
use serde_json::Value;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

use crate::client::Client;
use crate::errors::{BoxError, Result};
use crate::session::Session;
use crate::types::{CancellationFlag, FileItem, Metadata, MetadataTarget};

/// Substrings that mark a value as an unfilled placeholder
pub const PLACEHOLDER_INDICATORS: &[&str] = &[
    "insert",
    "placeholder",
    "<",
    ">",
    "[",
    "]",
    "enter",
    "fill in",
    "your",
    "example",
];

/// Key added when every extracted value was a placeholder
pub const PLACEHOLDER_NOTE_KEY: &str = "_note";

const PLACEHOLDER_NOTE: &str = "All other values were placeholders";

/// Default time allowed for writing one file, in seconds
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

/// Shortest accepted per-file timeout, in seconds
pub const MIN_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Longest accepted per-file timeout, in seconds
pub const MAX_OPERATION_TIMEOUT_SECS: u64 = 300;

/// Settings for a metadata application run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Lowercase keys and replace spaces and hyphens with underscores
    pub normalize_keys: bool,
    /// Drop values that look like unfilled placeholders
    pub filter_placeholders: bool,
    /// Overlay user edits on the extracted values
    pub use_edits: bool,
    /// Metadata instance the values are written to
    pub target: MetadataTarget,
    operation_timeout: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            normalize_keys: true,
            filter_placeholders: true,
            use_edits: true,
            target: MetadataTarget::Properties,
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }
}

impl ApplyOptions {
    /// Enables or disables key normalization
    pub fn with_normalize_keys(mut self, enabled: bool) -> Self {
        self.normalize_keys = enabled;
        self
    }

    /// Enables or disables placeholder filtering
    pub fn with_filter_placeholders(mut self, enabled: bool) -> Self {
        self.filter_placeholders = enabled;
        self
    }

    /// Chooses whether user edits are overlaid on the extracted values
    pub fn with_use_edits(mut self, enabled: bool) -> Self {
        self.use_edits = enabled;
        self
    }

    /// Sets the metadata target
    pub fn with_target(mut self, target: MetadataTarget) -> Self {
        self.target = target;
        self
    }

    /// Sets the per-file timeout, clamped to 10..=300 seconds
    pub fn with_operation_timeout(mut self, secs: u64) -> Self {
        self.operation_timeout = Duration::from_secs(
            secs.clamp(MIN_OPERATION_TIMEOUT_SECS, MAX_OPERATION_TIMEOUT_SECS),
        );
        self
    }

    /// Time allowed for writing one file
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

/// Reports whether a value looks like an unfilled placeholder
///
/// Only strings are checked; the match is a case-insensitive substring test.
pub fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let lower = s.to_lowercase();
            PLACEHOLDER_INDICATORS
                .iter()
                .any(|indicator| lower.contains(indicator))
        }
        _ => false,
    }
}

/// Removes placeholder values
///
/// When every value is a placeholder and the target is the free-form
/// `properties` instance, the first entry in answer order is kept together
/// with a note so that the file still receives an instance. Template targets
/// have a fixed schema with no room for the note, so nothing is kept.
pub fn filter_placeholders(values: &Metadata, target: &MetadataTarget) -> Metadata {
    let filtered: Metadata = values
        .iter()
        .filter(|(_, value)| !is_placeholder(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if !filtered.is_empty() || values.is_empty() || !target.is_properties() {
        return filtered;
    }

    let mut kept = Metadata::new();
    if let Some((key, value)) = values.iter().next() {
        kept.insert(key.clone(), value.clone());
    }
    kept.insert(
        PLACEHOLDER_NOTE_KEY.to_string(),
        Value::String(PLACEHOLDER_NOTE.to_string()),
    );
    kept
}

/// Converts a key to Box field key form
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase().replace([' ', '-'], "_")
}

/// Normalizes every key
///
/// Keys that collapse to the same form keep the value that comes last.
pub fn normalize_keys(values: &Metadata) -> Metadata {
    values
        .iter()
        .map(|(key, value)| (normalize_key(key), value.clone()))
        .collect()
}

/// Coerces values into types the target accepts
///
/// Nulls are dropped and nested values become JSON text. The free-form
/// `properties` instance only holds strings, so numbers and booleans are
/// stringified for it.
pub fn coerce_values(values: &Metadata, target: &MetadataTarget) -> Metadata {
    let stringify_scalars = target.is_properties();

    values
        .iter()
        .filter_map(|(key, value)| {
            let coerced = match value {
                Value::Null => return None,
                Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
                Value::Number(n) if stringify_scalars => Value::String(n.to_string()),
                Value::Bool(b) if stringify_scalars => Value::String(b.to_string()),
                other => other.clone(),
            };
            Some((key.clone(), coerced))
        })
        .collect()
}

/// Turns raw values into the payload written to Box
pub fn prepare_metadata(values: &Metadata, options: &ApplyOptions) -> Result<Metadata> {
    if values.is_empty() {
        return Err(BoxError::EmptyMetadata(
            "No metadata values to apply".to_string(),
        ));
    }

    let mut prepared = if options.filter_placeholders {
        filter_placeholders(values, &options.target)
    } else {
        values.clone()
    };

    if options.normalize_keys && options.target.is_properties() {
        prepared = normalize_keys(&prepared);
    }

    let prepared = coerce_values(&prepared, &options.target);
    if prepared.is_empty() {
        return Err(BoxError::EmptyMetadata(
            "No valid metadata found after filtering placeholders".to_string(),
        ));
    }

    Ok(prepared)
}

/// Result of writing one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    /// Box file id
    pub file_id: String,
    /// File name, for display
    pub file_name: String,
    /// True when the values were written
    pub success: bool,
    /// Values that were sent, when the write succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Failure message, when the write failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when an existing instance was updated
    pub updated: bool,
}

impl ApplyOutcome {
    fn succeeded(file: &FileItem, metadata: Metadata, updated: bool) -> Self {
        Self {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            success: true,
            metadata: Some(metadata),
            error: None,
            updated,
        }
    }

    fn failed(file: &FileItem, error: impl Into<String>) -> Self {
        Self {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            success: false,
            metadata: None,
            error: Some(error.into()),
            updated: false,
        }
    }
}

/// Result of an application run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    /// Per-file results in selection order
    pub outcomes: Vec<ApplyOutcome>,
    /// Number of files written
    pub succeeded: usize,
    /// Number of files that failed
    pub failed: usize,
    /// True when the run stopped before the last file
    pub cancelled: bool,
}

impl ApplyReport {
    fn push(&mut self, outcome: ApplyOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }
}

async fn apply_file(
    client: &Client,
    session: &Session,
    file: &FileItem,
    options: &ApplyOptions,
) -> ApplyOutcome {
    let Some(values) = session.metadata_for(&file.id, options.use_edits) else {
        return ApplyOutcome::failed(file, "No metadata found for file");
    };

    let prepared = match prepare_metadata(&values, options) {
        Ok(prepared) => prepared,
        Err(e) => return ApplyOutcome::failed(file, e.to_string()),
    };

    let write = client.apply_metadata(&file.id, &options.target, &prepared);
    match timeout(options.operation_timeout(), write).await {
        Ok(Ok(applied)) => ApplyOutcome::succeeded(file, prepared, applied.updated),
        Ok(Err(e)) => ApplyOutcome::failed(file, e.to_string()),
        Err(_) => ApplyOutcome::failed(
            file,
            BoxError::Timeout("metadata application".to_string()).to_string(),
        ),
    }
}

/// Writes metadata to every selected file, one file at a time
///
/// The cancellation flag is checked before each file. `progress` is called
/// with the position of the file, the number of files and the file itself.
pub async fn apply_batch<F>(
    client: &Client,
    session: &Session,
    options: &ApplyOptions,
    cancel: &CancellationFlag,
    mut progress: F,
) -> ApplyReport
where
    F: FnMut(usize, usize, &FileItem),
{
    let files = session.selected();
    let total = files.len();
    let mut report = ApplyReport::default();

    info!(total, target = %options.target, "applying metadata");

    for (index, file) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = total - index, "metadata application cancelled");
            report.cancelled = true;
            break;
        }

        progress(index, total, file);
        let outcome = apply_file(client, session, file, options).await;
        match &outcome.error {
            None => info!(file = %file.name, updated = outcome.updated, "applied metadata"),
            Some(e) => error!(file = %file.name, error = %e, "failed to apply metadata"),
        }
        report.push(outcome);
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        "metadata application finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientConfig, ExtractionOutcome};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata(value: Value) -> Metadata {
        serde_json::from_value(value).unwrap()
    }

    fn invoice_target() -> MetadataTarget {
        MetadataTarget::template("enterprise", "invoice")
    }

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder(&json!("Insert vendor name")));
        assert!(is_placeholder(&json!("<date>")));
        assert!(is_placeholder(&json!("Your Company")));
        assert!(is_placeholder(&json!("[TBD]")));
        assert!(!is_placeholder(&json!("Acme Corp")));
        assert!(!is_placeholder(&json!(42)));
        assert!(!is_placeholder(&Value::Null));
    }

    #[test]
    fn test_filter_keeps_real_values() {
        let values = metadata(json!({"vendor": "Acme", "total": "<amount>"}));
        let filtered = filter_placeholders(&values, &MetadataTarget::Properties);
        assert_eq!(filtered, metadata(json!({"vendor": "Acme"})));
    }

    #[test]
    fn test_filter_all_placeholders_keeps_first_with_note() {
        let values = metadata(json!({"b_field": "enter value", "a_field": "your name"}));
        let filtered = filter_placeholders(&values, &MetadataTarget::Properties);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered["b_field"], "enter value");
        assert_eq!(filtered[PLACEHOLDER_NOTE_KEY], PLACEHOLDER_NOTE);
    }

    #[test]
    fn test_all_placeholders_keep_answer_order() {
        // Arrange: keys arrive out of alphabetical order
        let values: Metadata =
            serde_json::from_str(r#"{"zeta":"enter a value","alpha":"your name"}"#).unwrap();

        // Act
        let prepared = prepare_metadata(&values, &ApplyOptions::default()).unwrap();

        // Assert
        let keys: Vec<&str> = prepared.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", PLACEHOLDER_NOTE_KEY]);
    }

    #[test]
    fn test_all_placeholders_for_template_add_no_note() {
        let values = metadata(json!({"vendorName": "enter a value"}));

        let filtered = filter_placeholders(&values, &invoice_target());
        assert!(filtered.is_empty());

        let options = ApplyOptions::default().with_target(invoice_target());
        let err = prepare_metadata(&values, &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No valid metadata found after filtering placeholders"
        );
    }

    #[test]
    fn test_normalize_keys_later_collision_wins() {
        let values = metadata(json!({"Due Date": "2024-01-01", "due-date": "2024-02-01"}));
        let normalized = normalize_keys(&values);
        assert_eq!(normalized, metadata(json!({"due_date": "2024-02-01"})));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Invoice Number"), "invoice_number");
        assert_eq!(normalize_key("due-date"), "due_date");
        assert_eq!(normalize_key("already_ok"), "already_ok");
    }

    #[test]
    fn test_coerce_for_properties() {
        let values = metadata(json!({
            "amount": 12.5,
            "paid": true,
            "tags": ["a", "b"],
            "missing": null,
            "name": "Acme"
        }));
        let coerced = coerce_values(&values, &MetadataTarget::Properties);
        assert_eq!(coerced["amount"], "12.5");
        assert_eq!(coerced["paid"], "true");
        assert_eq!(coerced["tags"], "[\"a\",\"b\"]");
        assert_eq!(coerced["name"], "Acme");
        assert!(!coerced.contains_key("missing"));
    }

    #[test]
    fn test_coerce_for_template_keeps_numbers() {
        let values = metadata(json!({"amount": 12.5}));
        let coerced = coerce_values(&values, &MetadataTarget::template("enterprise", "invoice"));
        assert_eq!(coerced["amount"], json!(12.5));
    }

    #[test]
    fn test_prepare_metadata_pipeline() {
        let values = metadata(json!({
            "Vendor Name": "Acme",
            "Due-Date": "2024-03-01",
            "Notes": "Insert notes here"
        }));
        let prepared = prepare_metadata(&values, &ApplyOptions::default()).unwrap();
        assert_eq!(
            prepared,
            metadata(json!({"vendor_name": "Acme", "due_date": "2024-03-01"}))
        );
    }

    #[test]
    fn test_prepare_metadata_keeps_template_field_keys() {
        // Arrange
        let values = metadata(json!({"invoiceNumber": "A-1", "vendorName": "Acme"}));
        let options = ApplyOptions::default().with_target(invoice_target());

        // Act
        let prepared = prepare_metadata(&values, &options).unwrap();

        // Assert
        assert_eq!(prepared, values);
    }

    #[test]
    fn test_prepare_metadata_options_off() {
        let options = ApplyOptions::default()
            .with_normalize_keys(false)
            .with_filter_placeholders(false);
        let values = metadata(json!({"Vendor Name": "<vendor>"}));
        let prepared = prepare_metadata(&values, &options).unwrap();
        assert_eq!(prepared["Vendor Name"], "<vendor>");
    }

    #[test]
    fn test_prepare_metadata_errors() {
        let err = prepare_metadata(&Metadata::new(), &ApplyOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "No metadata values to apply");

        let err = prepare_metadata(&metadata(json!({"a": null})), &ApplyOptions::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No valid metadata found after filtering placeholders"
        );
    }

    #[test]
    fn test_option_builders() {
        let options = ApplyOptions::default()
            .with_normalize_keys(false)
            .with_filter_placeholders(false)
            .with_use_edits(false)
            .with_target(invoice_target())
            .with_operation_timeout(30);

        assert!(!options.normalize_keys);
        assert!(!options.filter_placeholders);
        assert!(!options.use_edits);
        assert_eq!(options.target, invoice_target());
        assert_eq!(options.operation_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_operation_timeout_is_clamped() {
        let options = ApplyOptions::default();
        assert_eq!(options.operation_timeout(), Duration::from_secs(60));
        assert_eq!(
            ApplyOptions::default().with_operation_timeout(1).operation_timeout(),
            Duration::from_secs(10)
        );
        assert_eq!(
            ApplyOptions::default().with_operation_timeout(900).operation_timeout(),
            Duration::from_secs(300)
        );
    }

    /// A slow write fails on its own and the run moves on to the next file
    #[tokio::test]
    async fn test_slow_write_times_out_per_file() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/101/metadata/global/properties"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files/102/metadata/global/properties"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"vendor": "Globex"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = Session::new();
        session.select(vec![
            FileItem::new("101", "slow.pdf"),
            FileItem::new("102", "fast.pdf"),
        ]);
        for (id, vendor) in [("101", "Acme"), ("102", "Globex")] {
            session
                .record_result(ExtractionOutcome {
                    file_id: id.to_string(),
                    file_name: format!("{id}.pdf"),
                    fields: metadata(json!({"vendor": vendor})),
                })
                .unwrap();
        }

        let config = ClientConfig::new("test-token")
            .with_api_base_url(server.uri())
            .with_retry_count(1);
        let client = Client::new(config).unwrap();
        let options = ApplyOptions {
            operation_timeout: Duration::from_millis(200),
            ..Default::default()
        };

        // Act
        let report =
            apply_batch(&client, &session, &options, &CancellationFlag::new(), |_, _, _| {}).await;

        // Assert
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(
            report.outcomes[0].error.as_deref(),
            Some("Timeout during metadata application")
        );
        assert!(report.outcomes[1].success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
    }
}
