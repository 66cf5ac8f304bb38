//! Basic Box Metadata Client Usage Example
//!
//! This example demonstrates the fundamental operations of the client:
//! - Looking up a file
//! - Listing metadata templates
//! - Extracting metadata with a prompt
//! - Writing the result to the file's properties instance
//! - Reading it back
//!
//! Run this example with:
//! ```bash
//! BOX_ACCESS_TOKEN=... cargo run --example basic_usage -- 1234567
//! ```

use box_metadata::{prepare_metadata, ApplyOptions, Client, ClientConfig, MetadataTarget};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Box Metadata Client - Basic Usage Example");
    println!("{}", "=".repeat(50));

    let file_id = std::env::args()
        .nth(1)
        .ok_or("usage: basic_usage <file-id>")?;

    // Step 1: Configure the client from BOX_ACCESS_TOKEN and friends
    let config = ClientConfig::from_env()?
        .with_network_timeout(30000)
        .with_retry_count(3);

    // Step 2: Create the client instance
    let client = Client::new(config)?;

    // Example 1: Look up the file
    println!("\n1. Getting file information...");
    let file = client.get_file_info(&file_id).await?;
    println!("   Name: {}", file.name);
    println!("   Size: {:?} bytes", file.size);

    // Example 2: List templates
    println!("\n2. Listing metadata templates...");
    let templates = client.list_all_templates().await?;
    for template in templates.iter().filter(|t| !t.hidden).take(5) {
        println!("   {} ({})", template.display_name, template.template_key);
    }

    // Example 3: Freeform extraction
    println!("\n3. Extracting metadata...");
    let fields = client
        .extract_freeform(&file_id, "Extract the title, author and date of this document as JSON.")
        .await?;
    for (key, value) in &fields {
        println!("   {}: {}", key, value);
    }

    // Example 4: Prepare and write the values
    // Preparation drops placeholders and turns keys into field keys
    println!("\n4. Applying metadata...");
    let prepared = prepare_metadata(&fields, &ApplyOptions::default())?;
    let applied = client
        .apply_metadata(&file_id, &MetadataTarget::Properties, &prepared)
        .await?;
    println!(
        "   {} the properties instance",
        if applied.updated { "Updated" } else { "Created" }
    );

    // Example 5: Read it back
    println!("\n5. Reading metadata...");
    let stored = client.get_metadata(&file_id, &MetadataTarget::Properties).await?;
    println!("   {} fields stored", stored.len());

    client.close().await;
    println!("\nDone.");
    Ok(())
}
