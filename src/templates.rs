//! Metadata Template Retrieval
//!
//! Caches the templates visible to the user and picks the template that best
//! fits a document category.

use std::time::SystemTime;

use tracing::debug;

use crate::categorization::DocumentType;
use crate::client::Client;
use crate::errors::Result;
use crate::types::MetadataTemplate;

/// Cached list of metadata templates
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: Vec<MetadataTemplate>,
    fetched_at: Option<SystemTime>,
}

impl TemplateCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache pre-filled with templates
    ///
    /// Templates missing a key, scope or display name are dropped.
    pub fn with_templates(templates: Vec<MetadataTemplate>) -> Self {
        Self {
            templates: usable_templates(templates),
            fetched_at: Some(SystemTime::now()),
        }
    }

    /// Returns the cached templates, fetching them when empty or forced
    pub async fn get(&mut self, client: &Client, force_refresh: bool) -> Result<&[MetadataTemplate]> {
        if force_refresh || self.templates.is_empty() {
            self.templates = usable_templates(client.list_all_templates().await?);
            self.fetched_at = Some(SystemTime::now());
        }
        Ok(&self.templates)
    }

    /// Time of the last successful fetch
    pub fn fetched_at(&self) -> Option<SystemTime> {
        self.fetched_at
    }

    /// Cached templates without fetching
    pub fn templates(&self) -> &[MetadataTemplate] {
        &self.templates
    }

    /// Finds a template by its id
    pub fn by_id(&self, template_id: &str) -> Option<&MetadataTemplate> {
        self.templates.iter().find(|t| t.id == template_id)
    }

    /// Finds a template by scope and key
    ///
    /// The scope `enterprise` also matches enterprise-qualified scopes such as
    /// `enterprise_12345`.
    pub fn by_key(&self, scope: &str, template_key: &str) -> Option<&MetadataTemplate> {
        self.templates
            .iter()
            .find(|t| t.template_key == template_key && scope_matches(&t.scope, scope))
    }
}

fn scope_matches(actual: &str, wanted: &str) -> bool {
    actual == wanted || (wanted == "enterprise" && actual.starts_with("enterprise_"))
}

/// Checks that a template carries what extraction needs
pub fn validate_template_format(template: &MetadataTemplate) -> bool {
    !template.template_key.is_empty()
        && !template.scope.is_empty()
        && !template.display_name.is_empty()
}

/// Keeps the templates that pass [`validate_template_format`]
pub fn usable_templates(templates: Vec<MetadataTemplate>) -> Vec<MetadataTemplate> {
    templates
        .into_iter()
        .filter(|template| {
            let valid = validate_template_format(template);
            if !valid {
                debug!(id = %template.id, "skipping incomplete template");
            }
            valid
        })
        .collect()
}

/// Keywords looked up in template names and descriptions per document type
pub fn document_type_keywords(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::SalesContract => &["sales", "contract", "agreement", "deal"],
        DocumentType::Invoices => &["invoice", "bill", "payment", "receipt"],
        DocumentType::Tax => &["tax", "irs", "return", "1099", "w2", "w-2"],
        DocumentType::FinancialReport => &["financial", "report", "statement", "balance", "income"],
        DocumentType::EmploymentContract => {
            &["employment", "hr", "human resources", "employee", "personnel"]
        }
        DocumentType::Pii => &["personal", "pii", "identity", "confidential", "private"],
        DocumentType::Other => &[],
    }
}

/// Picks the template that best matches a document type
///
/// Each keyword found in the display name scores 2, in the description 1.
/// The highest positive score wins; on a tie the earlier template wins.
/// `Other` never matches, so those files fall back to freeform extraction.
pub fn match_template_to_document_type(
    document_type: DocumentType,
    templates: &[MetadataTemplate],
) -> Option<&MetadataTemplate> {
    let keywords = document_type_keywords(document_type);
    if keywords.is_empty() {
        return None;
    }

    let mut best: Option<(&MetadataTemplate, usize)> = None;
    for template in templates {
        let name = template.display_name.to_lowercase();
        let description = template
            .description
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();

        let score: usize = keywords
            .iter()
            .map(|keyword| {
                let mut s = 0;
                if name.contains(keyword) {
                    s += 2;
                }
                if description.contains(keyword) {
                    s += 1;
                }
                s
            })
            .sum();

        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((template, score));
        }
    }

    best.map(|(template, _)| template)
}
