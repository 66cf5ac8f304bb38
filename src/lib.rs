//! Box Metadata Extraction Library
//!
//! Extracts metadata from Box files with Box AI and writes it back onto the
//! files as metadata instances.
//! Provides a high-level, async, type-safe API over the Box AI and metadata
//! endpoints, plus the batch workflow built on top of it.
//!
//! # Features
//!
//! - Structured extraction (template or custom fields) and freeform extraction
//! - Document categorization and per-category template selection
//! - Metadata template listing with paging and caching
//! - Batch application with placeholder filtering and key normalization
//! - Create-then-update fallback when an instance already exists
//! - Sequential or bounded-parallel extraction runs
//! - Async/await support with Tokio
//! - Comprehensive error handling
//!
//! # Example
//!
//! ```no_run
//! use box_metadata::{apply_batch, ApplyOptions, CancellationFlag, Client, ClientConfig, FileItem, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::from_env()?)?;
//!
//!     let mut session = Session::new();
//!     session.select(vec![FileItem::new("1234567", "invoice.pdf")]);
//!     session.set_edit("1234567", "Vendor Name", "Acme Corp".into())?;
//!
//!     let report = apply_batch(
//!         &client,
//!         &session,
//!         &ApplyOptions::default(),
//!         &CancellationFlag::new(),
//!         |_, _, _| {},
//!     )
//!     .await;
//!     println!("{} written, {} failed", report.succeeded, report.failed);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod application;
pub mod categorization;
mod client;
mod connection;
mod errors;
mod operations;
pub mod processing;
pub mod protocol;
pub mod session;
pub mod templates;
mod types;

// Re-export public API
pub use application::{apply_batch, prepare_metadata, ApplyOptions, ApplyOutcome, ApplyReport};
pub use categorization::{categorize_selection, Categorization, DocumentType};
pub use client::Client;
pub use errors::{BoxError, Result};
pub use operations::{AppliedMetadata, DEFAULT_FREEFORM_PROMPT};
pub use processing::{process_files, ExtractionConfig, ExtractionMethod, ProcessingMode, ProcessingSummary};
pub use protocol::{PatchOp, PatchOperation, StructuredSource, TemplateRef};
pub use session::Session;
pub use templates::TemplateCache;
pub use types::{
    CancellationFlag, ClientConfig, CustomField, ExtractionOutcome, FieldOption, FileItem, Metadata,
    MetadataTarget, MetadataTemplate, TemplateField, TemplateScope, AI_MODELS, DEFAULT_AI_MODEL,
    DEFAULT_API_BASE_URL, GLOBAL_SCOPE, PROPERTIES_TEMPLATE,
};
