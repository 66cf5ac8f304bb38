//! Batch Extraction and Application Example
//!
//! This example runs the whole workflow over several files:
//! - Selecting files into a session
//! - Extracting with a template, in parallel
//! - Editing one value by hand
//! - Writing every result back, with create-then-update fallback
//!
//! Run this example with:
//! ```bash
//! BOX_ACCESS_TOKEN=... cargo run --example batch_apply_example -- invoice 1234567 7654321
//! ```

use box_metadata::{
    apply_batch, process_files, ApplyOptions, CancellationFlag, Client, ClientConfig,
    ExtractionConfig, MetadataTarget, ProcessingMode, Session, TemplateRef,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let template_key = args
        .next()
        .ok_or("usage: batch_apply_example <template-key> <file-id>...")?;
    let file_ids: Vec<String> = args.collect();

    let client = Client::new(ClientConfig::from_env()?)?;
    let cancel = CancellationFlag::new();

    // Select the files
    let mut session = Session::new();
    for file_id in &file_ids {
        match client.get_file_info(file_id).await {
            Ok(file) => {
                session.select([file]);
            }
            Err(e) => println!("Skipping {}: {}", file_id, e),
        }
    }

    // Extract against the template, three files at a time
    let config = ExtractionConfig {
        template: Some(TemplateRef::new("enterprise", template_key.clone())),
        mode: ProcessingMode::Parallel,
        batch_size: 3,
        ..Default::default()
    };
    let summary = process_files(&client, &mut session, &config, &cancel, |i, total, file| {
        println!("[{}/{}] extracting {}", i + 1, total, file.name);
    })
    .await?;
    println!("Extracted {} files, {} failed", summary.processed, summary.failed);

    // Correct one value by hand
    let first = session.results().next().map(|r| r.file_id.clone());
    if let Some(first) = first {
        session.set_edit(&first, "reviewed_by", "batch example".into())?;
    }

    // Write to the same template the values were extracted with
    let options = ApplyOptions::default()
        .with_target(MetadataTarget::template("enterprise", template_key))
        .with_operation_timeout(120);
    let report = apply_batch(&client, &session, &options, &cancel, |i, total, file| {
        println!("[{}/{}] applying {}", i + 1, total, file.name);
    })
    .await;

    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "{}: {}",
                outcome.file_name,
                if outcome.updated { "updated" } else { "created" }
            ),
            Some(e) => println!("{}: {}", outcome.file_name, e),
        }
    }

    client.close().await;
    Ok(())
}
