//! Database statistics and health overview.
//!
//! Summarises what is indexed: document and chunk counts, the embedding
//! model the index was built with (and whether it matches the configured
//! one), and a per-kind breakdown. Used by `cqa stats`.

use anyhow::Result;
use sqlx::Row;

use context_qa_core::store::IndexStore;

use crate::app::open_store;
use crate::config::Config;
use crate::embedding::create_embedder;

struct KindStats {
    kind: String,
    doc_count: i64,
    chunk_count: i64,
    last_ingested_ms: Option<i64>,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let pool = store.pool();

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let identity = store.identity().await?;

    let rows = sqlx::query(
        r#"
        SELECT
            d.kind,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(c.chunk_index) AS chunk_count,
            MAX(d.ingested_at) AS last_ingested
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        GROUP BY d.kind
        ORDER BY doc_count DESC, d.kind ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    let by_kind: Vec<KindStats> = rows
        .iter()
        .map(|row| KindStats {
            kind: row.get("kind"),
            doc_count: row.get("doc_count"),
            chunk_count: row.get("chunk_count"),
            last_ingested_ms: row.get("last_ingested"),
        })
        .collect();

    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Context QA: Index Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);

    let configured = create_embedder(&config.embedding).ok();
    match &identity {
        Some(identity) => {
            println!("  Model:       {} ({} dims)", identity.model, identity.dims);
            if let Some(embedder) = configured {
                if embedder.model_id() != &identity.model || embedder.dims() != identity.dims {
                    println!(
                        "  Warning:     configured embedder is {} ({} dims); run `cqa reindex`",
                        embedder.model_id(),
                        embedder.dims()
                    );
                }
            }
        }
        None => println!("  Model:       (none yet)"),
    }

    if !by_kind.is_empty() {
        println!();
        println!("  By kind:");
        println!(
            "  {:<12} {:>6} {:>8}   {}",
            "KIND", "DOCS", "CHUNKS", "LAST INGESTED"
        );
        println!("  {}", "-".repeat(52));
        for s in &by_kind {
            let last = s
                .last_ingested_ms
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<12} {:>6} {:>8}   {}",
                s.kind, s.doc_count, s.chunk_count, last
            );
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a millisecond timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts_ms: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts_ms / 1000;
    if delta < 0 {
        return format_ts_iso(ts_ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}
