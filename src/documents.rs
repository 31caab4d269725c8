//! Document management commands: `list`, `delete`, `clear`, `reindex`, and
//! `templates`.

use anyhow::Result;

use crate::app::{open_store, App, IndexLoad};
use crate::config::Config;
use context_qa_core::store::IndexStore;

pub async fn run_list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let documents = store.list_documents().await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }
    if documents.is_empty() {
        println!("No documents ingested.");
        return Ok(());
    }

    println!(
        "{:<40} {:<9} {:>7}   {}",
        "DOCUMENT", "KIND", "CHUNKS", "INGESTED"
    );
    println!("{}", "-".repeat(78));
    for doc in &documents {
        println!(
            "{:<40} {:<9} {:>7}   {}",
            doc.id,
            doc.kind.as_str(),
            doc.chunk_count,
            doc.ingested_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    println!("{} document(s)", documents.len());
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let removed = store.delete_document(id).await;
    store.close().await;

    if removed? {
        println!("Deleted {}.", id);
    } else {
        println!("No document with id '{}'.", id);
    }
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let result = store.clear().await;
    store.close().await;
    result?;
    println!("All documents cleared.");
    Ok(())
}

/// Rebuild every chunk and vector with the configured chunking and embedder.
pub async fn run_reindex(config: &Config) -> Result<()> {
    let app = App::open(config, IndexLoad::Skip).await?;
    let result = app.ingestor.reindex().await;
    app.close().await;
    let report = result?;

    println!("reindex");
    println!("  model: {}", app.embedder.model_id());
    println!("  documents: {}", report.documents);
    println!("  chunks written: {}", report.chunks);
    println!("ok");
    Ok(())
}

/// Print configured templates and presets.
pub fn run_templates(config: &Config) -> Result<()> {
    println!("Templates (default: {}):", config.context.default_template);
    for (name, template) in &config.templates {
        match &template.description {
            Some(description) => println!("  {:<16} {}", name, description),
            None => println!("  {}", name),
        }
    }

    println!();
    if config.presets.is_empty() {
        println!("Presets: none");
        return Ok(());
    }
    println!("Presets:");
    for (name, question) in &config.presets {
        println!("  {:<20} {}", name, question);
    }
    Ok(())
}
