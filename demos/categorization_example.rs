//! Document Categorization Example
//!
//! This example categorizes files with Box AI, then maps every detected
//! document type to the best-matching metadata template.
//!
//! Run this example with:
//! ```bash
//! BOX_ACCESS_TOKEN=... cargo run --example categorization_example -- 1234567 7654321
//! ```

use box_metadata::templates::match_template_to_document_type;
use box_metadata::{
    categorize_selection, CancellationFlag, Client, ClientConfig, ExtractionConfig, TemplateCache,
    DEFAULT_AI_MODEL,
};
use box_metadata::{ExtractionMethod, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(ClientConfig::from_env()?)?;

    let mut session = Session::new();
    for file_id in std::env::args().skip(1) {
        let file = client.get_file_info(&file_id).await?;
        session.select([file]);
    }

    // Categorize every selected file
    let summary =
        categorize_selection(&client, &mut session, Some(DEFAULT_AI_MODEL), &CancellationFlag::new())
            .await?;
    println!("Categorized {} files, {} failed", summary.categorized, summary.failed);

    let mut cache = TemplateCache::new();
    let templates = cache.get(&client, false).await?.to_vec();

    for file in session.selected() {
        let Some(category) = session.category(&file.id) else {
            continue;
        };
        let template = match_template_to_document_type(category.document_type, &templates);
        println!(
            "{}: {} ({:.0}%) -> {}",
            file.name,
            category.document_type,
            category.confidence * 100.0,
            template.map_or("freeform extraction", |t| t.display_name.as_str())
        );
    }

    // Build an extraction config from the mapping
    let mut config = ExtractionConfig {
        method: ExtractionMethod::Freeform,
        ..Default::default()
    };
    let document_types = session
        .selected()
        .iter()
        .filter_map(|f| session.category(&f.id).map(|c| c.document_type));
    let mapped = config.map_document_types(document_types, &templates);
    println!("\nMapped {} document types:\n{}", mapped, toml::to_string_pretty(&config)?);

    client.close().await;
    Ok(())
}
