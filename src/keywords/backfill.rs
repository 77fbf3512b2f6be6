//! Deterministic keyword backfill over stored chunks.

use serde::Serialize;
use tracing::info;

use super::KeywordMap;
use crate::error::Result;
use crate::store::EmbeddingStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Chunks that had no keywords when the pass started.
    pub scanned: usize,
    /// Chunks that received keywords.
    pub updated: usize,
}

/// Tag every chunk that has no keywords yet with the known terms its text
/// contains. Chunks that already carry keywords are never read or written,
/// and chunks with no matching term are left as they are, so a second run
/// over the same corpus writes nothing.
pub async fn backfill(store: &EmbeddingStore, map: &KeywordMap) -> Result<BackfillReport> {
    let pending = store.chunks_missing_keywords().await?;
    let mut report = BackfillReport {
        scanned: pending.len(),
        updated: 0,
    };

    for (chunk_id, text) in pending {
        let tags = map.match_text(&text);
        if tags.is_empty() {
            continue;
        }
        store.update_keywords(chunk_id, &tags).await?;
        report.updated += 1;
    }

    info!(scanned = report.scanned, updated = report.updated, "keyword backfill finished");
    Ok(report)
}
