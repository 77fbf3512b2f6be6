//! Store overview and token usage reports.
//!
//! `kh stats` summarises what is indexed (documents per type, chunk counts,
//! embedding and keyword coverage). `kh tokens` prints the token ledger
//! aggregates, optionally over a trailing window of days.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::models::format_ts_iso;
use crate::progress::format_number;
use crate::store::EmbeddingStore;
use crate::tokens::{TokenLedger, TokenStats};

/// Per-type breakdown of document and chunk counts.
struct TypeStats {
    doc_type: String,
    doc_count: i64,
    chunk_count: i64,
    embedded_count: i64,
}

/// Run the stats command: query the knowledge store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = EmbeddingStore::open(&config.db.path, config.embedding.dims).await?;
    let pool = store.pool();

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let total_embedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;
    let total_tagged: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks WHERE keywords IS NOT NULL AND keywords != ''",
    )
    .fetch_one(pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Knowledge Harness - Store Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Dimensions:  {}", store.dims());
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        percent(total_embedded, total_chunks)
    );
    println!(
        "  Keywords:    {} / {} ({}%)",
        total_tagged,
        total_chunks,
        percent(total_tagged, total_chunks)
    );

    let rows = sqlx::query(
        r#"
        SELECT
            d.doc_type,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(c.chunk_id) AS chunk_count,
            COUNT(c.embedding) AS embedded_count
        FROM documents d
        LEFT JOIN chunks c ON c.doc_id = d.id
        GROUP BY d.doc_type
        ORDER BY doc_count DESC, d.doc_type ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_type = Vec::with_capacity(rows.len());
    for row in &rows {
        by_type.push(TypeStats {
            doc_type: row.try_get("doc_type")?,
            doc_count: row.try_get("doc_count")?,
            chunk_count: row.try_get("chunk_count")?,
            embedded_count: row.try_get("embedded_count")?,
        });
    }

    if !by_type.is_empty() {
        println!();
        println!("  By type:");
        println!(
            "  {:<24} {:>6} {:>8} {:>10}",
            "TYPE", "DOCS", "CHUNKS", "EMBEDDED"
        );
        println!("  {}", "-".repeat(52));
        for t in &by_type {
            println!(
                "  {:<24} {:>6} {:>8} {:>10}",
                t.doc_type, t.doc_count, t.chunk_count, t.embedded_count
            );
        }
    }

    println!();
    store.pool().close().await;
    Ok(())
}

/// Run `kh tokens`: print ledger aggregates.
pub async fn run_token_stats(config: &Config, days: Option<u32>) -> Result<()> {
    let ledger = TokenLedger::open(&config.db.token_path()).await?;
    let stats = ledger.stats(days).await?;
    print_token_stats(&stats);
    ledger.pool().close().await;
    Ok(())
}

fn print_token_stats(stats: &TokenStats) {
    let window = match stats.window_days {
        Some(d) => format!("last {} day{}", d, if d == 1 { "" } else { "s" }),
        None => "all time".to_string(),
    };

    println!("Token Usage ({})", window);
    println!("==================");
    println!();
    println!("  Calls:       {}", format_number(stats.calls));
    println!("  Prompt:      {}", format_number(stats.totals.prompt));
    println!("  Completion:  {}", format_number(stats.totals.completion));
    println!("  Total:       {}", format_number(stats.totals.total));

    if !stats.by_operation.is_empty() {
        println!();
        println!("  By operation:");
        println!("  {:<24} {:>8} {:>14}", "OPERATION", "CALLS", "TOKENS");
        println!("  {}", "-".repeat(48));
        for op in &stats.by_operation {
            println!(
                "  {:<24} {:>8} {:>14}",
                op.operation,
                format_number(op.calls),
                format_number(op.total_tokens)
            );
        }
    }

    if !stats.top_files.is_empty() {
        println!();
        println!("  Top files:");
        for f in &stats.top_files {
            println!("  {:>14}  {}", format_number(f.total_tokens), f.file_name);
        }
    }

    if !stats.recent.is_empty() {
        println!();
        println!("  Recent:");
        for r in &stats.recent {
            println!(
                "  {}  {:<20} {:>8}  {}",
                format_ts_iso(r.timestamp),
                r.operation,
                format_number(r.usage.total),
                r.file_name.as_deref().unwrap_or("-")
            );
        }
    }
    println!();
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanised() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn percent_handles_empty_store() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
    }
}
