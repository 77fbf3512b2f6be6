//! Retrieval over the knowledge store.
//!
//! [`RetrievalEngine`] offers three independent strategies. Each one is a
//! total function from query to a ranked list: an empty query or an empty
//! corpus yields an empty list, and service failures surface as typed errors.
//!
//! # Keyword
//!
//! Two phases over SQL `LIKE` substring matching (ASCII case-insensitive):
//!
//! 1. filenames: if any document name matches, those documents are returned
//!    by upload recency and phase 2 is skipped;
//! 2. chunk text: one row per document (its most recent matching chunk),
//!    ordered by upload recency, with a short preview around the match.
//!
//! # Vector
//!
//! Embeds the query, ranks chunks by cosine similarity, and attaches the
//! owning document's metadata. Hits whose document cannot be loaded are
//! dropped.
//!
//! # Hybrid
//!
//! Runs both strategies with `2 × top_k` candidates and fuses them per chunk:
//!
//! ```text
//! decay(i, N)  = 1 − i / (2N)                       (i = 0-based rank)
//! vector_part  = similarity × w_vector × decay(i_v, N_v)
//! keyword_part = w_keyword × decay(i_k, N_k)
//! total        = vector_part + keyword_part
//! ```
//!
//! A keyword hit is a document, so its rank is shared by every chunk of that
//! document. Results are sorted by total (ties: ascending chunk id) and cut
//! to `top_k`. If the keyword phase or fusion fails, the vector results are
//! returned on their own.

use anyhow::bail;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{EmbeddingService, OpenAiClient};
use crate::models::{DocType, Document, SourceType};
use crate::store::EmbeddingStore;
use crate::tokens::{TokenLedger, TokenOperation};

const PREVIEW_BEFORE: usize = 50;
const PREVIEW_AFTER: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    Filename,
    Content,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordHit {
    pub document: Document,
    pub level: MatchLevel,
    /// Matching chunk for content hits.
    pub chunk_id: Option<i64>,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    pub similarity: f64,
    pub filename: String,
    pub doc_type: DocType,
    pub upload_date: i64,
    pub model_used: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    pub filename: String,
    pub doc_type: DocType,
    pub upload_date: i64,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub total_score: f64,
}

/// Fusion weights. Not normalised; callers may pass any non-negative pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub vector: f64,
    pub keyword: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            keyword: 0.4,
        }
    }
}

/// Per-chunk fusion result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedScore {
    pub chunk_id: i64,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub total: f64,
}

/// Rank discount `1 − i / (2n)`; runs from 1.0 at the head of a list down to
/// just above 0.5 at its tail.
pub fn positional_decay(rank: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    1.0 - rank as f64 / (2.0 * n as f64)
}

/// Fuse a similarity-ranked chunk list with a ranked list of keyword
/// documents (each given as its chunk ids).
pub fn fuse(
    vector_ranked: &[(i64, f64)],
    keyword_docs: &[Vec<i64>],
    weights: Weights,
    top_k: usize,
) -> Vec<FusedScore> {
    let mut scores: HashMap<i64, FusedScore> = HashMap::new();

    let n_vector = vector_ranked.len();
    for (rank, &(chunk_id, similarity)) in vector_ranked.iter().enumerate() {
        let part = similarity * weights.vector * positional_decay(rank, n_vector);
        let entry = scores.entry(chunk_id).or_insert(FusedScore {
            chunk_id,
            vector_score: 0.0,
            keyword_score: 0.0,
            total: 0.0,
        });
        entry.vector_score = part;
    }

    let n_keyword = keyword_docs.len();
    for (rank, chunk_ids) in keyword_docs.iter().enumerate() {
        let part = weights.keyword * positional_decay(rank, n_keyword);
        for &chunk_id in chunk_ids {
            let entry = scores.entry(chunk_id).or_insert(FusedScore {
                chunk_id,
                vector_score: 0.0,
                keyword_score: 0.0,
                total: 0.0,
            });
            entry.keyword_score = part;
        }
    }

    let mut fused: Vec<FusedScore> = scores
        .into_values()
        .map(|mut s| {
            s.total = s.vector_score + s.keyword_score;
            s
        })
        .collect();

    fused.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(top_k);
    fused
}

/// Text around the first ASCII case-insensitive occurrence of `query`, with
/// `...` where the text was cut. Falls back to the head of the text when the
/// query does not occur.
pub fn preview(text: &str, query: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let needle: Vec<char> = query.trim().chars().map(|c| c.to_ascii_lowercase()).collect();

    let position = if needle.is_empty() || needle.len() > chars.len() {
        None
    } else {
        (0..=chars.len() - needle.len()).find(|&start| {
            chars[start..start + needle.len()]
                .iter()
                .zip(&needle)
                .all(|(c, n)| c.to_ascii_lowercase() == *n)
        })
    };

    let (start, end) = match position {
        Some(p) => (
            p.saturating_sub(PREVIEW_BEFORE),
            (p + needle.len() + PREVIEW_AFTER).min(chars.len()),
        ),
        None => (0, (PREVIEW_BEFORE + PREVIEW_AFTER).min(chars.len())),
    };

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

pub struct RetrievalEngine<'a> {
    store: &'a EmbeddingStore,
    embedder: Option<&'a dyn EmbeddingService>,
    ledger: Option<&'a TokenLedger>,
}

impl<'a> RetrievalEngine<'a> {
    pub fn new(
        store: &'a EmbeddingStore,
        embedder: &'a dyn EmbeddingService,
        ledger: Option<&'a TokenLedger>,
    ) -> Self {
        Self {
            store,
            embedder: Some(embedder),
            ledger,
        }
    }

    /// An engine that can only run [`keyword`](Self::keyword) searches.
    pub fn keyword_only(store: &'a EmbeddingStore) -> Self {
        Self {
            store,
            embedder: None,
            ledger: None,
        }
    }

    /// Filename matches first; chunk-text matches only when no filename matches.
    ///
    /// Matching goes through SQLite `LIKE`, which folds case for ASCII
    /// letters only: `ETCH` finds `etch`, but `É` does not find `é`.
    pub async fn keyword(
        &self,
        query: &str,
        top_k: usize,
        doc_type: Option<DocType>,
    ) -> Result<Vec<KeywordHit>> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let by_name = self.store.filename_matches(query, top_k, doc_type).await?;
        if !by_name.is_empty() {
            debug!(query, hits = by_name.len(), "keyword search matched filenames");
            return Ok(by_name
                .into_iter()
                .map(|document| KeywordHit {
                    document,
                    level: MatchLevel::Filename,
                    chunk_id: None,
                    preview: None,
                })
                .collect());
        }

        let by_content = self.store.content_matches(query, top_k, doc_type).await?;
        debug!(query, hits = by_content.len(), "keyword search matched content");
        Ok(by_content
            .into_iter()
            .map(|m| KeywordHit {
                preview: Some(preview(&m.text_content, query)),
                chunk_id: Some(m.chunk_id),
                document: m.document,
                level: MatchLevel::Content,
            })
            .collect())
    }

    /// Embed the query and rank chunks by cosine similarity.
    pub async fn vector(
        &self,
        query: &str,
        top_k: usize,
        source_type: Option<SourceType>,
    ) -> Result<Vec<VectorHit>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let Some(embedder) = self.embedder else {
            return Err(Error::Config(
                "vector search needs an embedding service".into(),
            ));
        };
        self.store.ensure_dims(embedder.dims())?;
        let embedding = embedder.embed(query).await?;
        if let Some(ledger) = self.ledger {
            if let Err(e) = ledger
                .record(TokenOperation::SearchEmbedding, None, embedding.usage)
                .await
            {
                warn!(error = %e, "failed to record search embedding usage");
            }
        }

        let nearest = self
            .store
            .nearest(&embedding.vector, top_k, source_type)
            .await?;

        let mut documents: HashMap<i64, Option<Document>> = HashMap::new();
        let mut hits = Vec::with_capacity(nearest.len());
        for hit in nearest {
            if !documents.contains_key(&hit.doc_id) {
                let doc = match self.store.get_document(hit.doc_id).await {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(doc_id = hit.doc_id, error = %e, "document lookup failed");
                        None
                    }
                };
                documents.insert(hit.doc_id, doc);
            }
            let Some(Some(doc)) = documents.get(&hit.doc_id) else {
                continue;
            };
            hits.push(VectorHit {
                chunk_id: hit.chunk_id,
                doc_id: hit.doc_id,
                source_type: hit.source_type,
                title: hit.title,
                content: hit.content,
                similarity: hit.similarity,
                filename: doc.filename.clone(),
                doc_type: doc.doc_type,
                upload_date: doc.upload_date,
                model_used: doc.model_used.clone(),
            });
        }
        Ok(hits)
    }

    /// Weighted fusion of vector and keyword results.
    pub async fn hybrid(&self, query: &str, top_k: usize, weights: Weights) -> Result<Vec<HybridHit>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let vector_hits = self.vector(query, top_k * 2, None).await?;

        match self.fuse_with_keywords(query, top_k, weights, &vector_hits).await {
            Ok(hits) => Ok(hits),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "hybrid fusion failed, falling back to vector results");
                Ok(vector_hits
                    .into_iter()
                    .take(top_k)
                    .map(|h| HybridHit {
                        chunk_id: h.chunk_id,
                        doc_id: h.doc_id,
                        source_type: h.source_type,
                        title: h.title,
                        content: h.content,
                        filename: h.filename,
                        doc_type: h.doc_type,
                        upload_date: h.upload_date,
                        vector_score: h.similarity,
                        keyword_score: 0.0,
                        total_score: h.similarity,
                    })
                    .collect())
            }
        }
    }

    async fn fuse_with_keywords(
        &self,
        query: &str,
        top_k: usize,
        weights: Weights,
        vector_hits: &[VectorHit],
    ) -> Result<Vec<HybridHit>> {
        let keyword_hits = self.keyword(query, top_k * 2, None).await?;

        let mut candidates: HashMap<i64, HybridHit> = HashMap::new();
        for h in vector_hits {
            candidates.insert(
                h.chunk_id,
                HybridHit {
                    chunk_id: h.chunk_id,
                    doc_id: h.doc_id,
                    source_type: h.source_type,
                    title: h.title.clone(),
                    content: h.content.clone(),
                    filename: h.filename.clone(),
                    doc_type: h.doc_type,
                    upload_date: h.upload_date,
                    vector_score: 0.0,
                    keyword_score: 0.0,
                    total_score: 0.0,
                },
            );
        }

        let mut keyword_docs = Vec::with_capacity(keyword_hits.len());
        for hit in &keyword_hits {
            let chunks = self.store.get_by_doc(hit.document.id).await?;
            let mut ids = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                ids.push(chunk.chunk_id);
                candidates.entry(chunk.chunk_id).or_insert_with(|| HybridHit {
                    chunk_id: chunk.chunk_id,
                    doc_id: chunk.doc_id,
                    source_type: chunk.source_type,
                    title: chunk.title,
                    content: chunk.text_content,
                    filename: hit.document.filename.clone(),
                    doc_type: hit.document.doc_type,
                    upload_date: hit.document.upload_date,
                    vector_score: 0.0,
                    keyword_score: 0.0,
                    total_score: 0.0,
                });
            }
            keyword_docs.push(ids);
        }

        let vector_ranked: Vec<(i64, f64)> = vector_hits
            .iter()
            .map(|h| (h.chunk_id, h.similarity))
            .collect();

        let fused = fuse(&vector_ranked, &keyword_docs, weights, top_k);
        Ok(fused
            .into_iter()
            .filter_map(|score| {
                candidates.remove(&score.chunk_id).map(|mut hit| {
                    hit.vector_score = score.vector_score;
                    hit.keyword_score = score.keyword_score;
                    hit.total_score = score.total;
                    hit
                })
            })
            .collect())
    }
}

/// Search mode accepted by `kh search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Vector,
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use keyword, vector, or hybrid.",
                other
            ),
        }
    }
}

pub struct SearchOptions {
    pub mode: SearchMode,
    pub limit: Option<usize>,
    pub doc_type: Option<DocType>,
    pub source_type: Option<SourceType>,
    pub vector_weight: Option<f64>,
    pub keyword_weight: Option<f64>,
}

/// Run `kh search` and print results to stdout.
pub async fn run_search(config: &Config, query: &str, opts: SearchOptions) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let store = EmbeddingStore::open(&config.db.path, config.embedding.dims).await?;
    let top_k = opts.limit.unwrap_or(config.retrieval.top_k);

    let result = match opts.mode {
        SearchMode::Keyword => print_keyword(&store, query, top_k, &opts).await,
        SearchMode::Vector => print_vector(config, &store, query, top_k, &opts).await,
        SearchMode::Hybrid => print_hybrid(config, &store, query, top_k, &opts).await,
    };
    store.pool().close().await;
    result
}

async fn print_keyword(
    store: &EmbeddingStore,
    query: &str,
    top_k: usize,
    opts: &SearchOptions,
) -> anyhow::Result<()> {
    let engine = RetrievalEngine::keyword_only(store);
    let hits = engine.keyword(query, top_k, opts.doc_type).await?;
    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{}] {} ({})",
            i + 1,
            match hit.level {
                MatchLevel::Filename => "filename",
                MatchLevel::Content => "content",
            },
            hit.document.filename,
            hit.document.doc_type
        );
        println!(
            "    uploaded: {}",
            crate::models::format_ts_iso(hit.document.upload_date)
        );
        if let Some(preview) = &hit.preview {
            println!("    excerpt: \"{}\"", preview.replace('\n', " ").trim());
        }
        println!("    id: {}", hit.document.id);
        println!();
    }
    Ok(())
}

async fn print_vector(
    config: &Config,
    store: &EmbeddingStore,
    query: &str,
    top_k: usize,
    opts: &SearchOptions,
) -> anyhow::Result<()> {
    let client = OpenAiClient::from_config(config)?;
    let ledger = TokenLedger::open(&config.db.token_path()).await?;
    let engine = RetrievalEngine::new(store, &client, Some(&ledger));

    let hits = engine.vector(query, top_k, opts.source_type).await;
    ledger.pool().close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} / {} ({})",
            i + 1,
            hit.similarity,
            hit.filename,
            hit.title,
            hit.source_type
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.content));
        println!("    chunk: {}  doc: {}", hit.chunk_id, hit.doc_id);
        println!();
    }
    Ok(())
}

async fn print_hybrid(
    config: &Config,
    store: &EmbeddingStore,
    query: &str,
    top_k: usize,
    opts: &SearchOptions,
) -> anyhow::Result<()> {
    let client = OpenAiClient::from_config(config)?;
    let ledger = TokenLedger::open(&config.db.token_path()).await?;
    let engine = RetrievalEngine::new(store, &client, Some(&ledger));
    let weights = Weights {
        vector: opts.vector_weight.unwrap_or(config.retrieval.vector_weight),
        keyword: opts.keyword_weight.unwrap_or(config.retrieval.keyword_weight),
    };

    let hits = engine.hybrid(query, top_k, weights).await;
    ledger.pool().close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} / {} ({})",
            i + 1,
            hit.total_score,
            hit.filename,
            hit.title,
            hit.source_type
        );
        println!(
            "    vector: {:.3}  keyword: {:.3}",
            hit.vector_score, hit.keyword_score
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.content));
        println!("    chunk: {}  doc: {}", hit.chunk_id, hit.doc_id);
        println!();
    }
    Ok(())
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() > 240 {
        let head: String = flat.chars().take(240).collect();
        format!("{}...", head)
    } else {
        flat.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_runs_from_one_towards_half() {
        assert_eq!(positional_decay(0, 10), 1.0);
        assert!((positional_decay(5, 10) - 0.75).abs() < 1e-12);
        assert!((positional_decay(9, 10) - 0.55).abs() < 1e-12);
        assert_eq!(positional_decay(0, 0), 0.0);
    }

    #[test]
    fn vector_only_head_scores_weighted_similarity() {
        let vector: Vec<(i64, f64)> = (0..10).map(|i| (i + 1, 0.82 - i as f64 * 0.01)).collect();
        let fused = fuse(&vector, &[], Weights::default(), 10);
        assert_eq!(fused[0].chunk_id, 1);
        assert!((fused[0].total - 0.492).abs() < 1e-9);
        assert_eq!(fused[0].keyword_score, 0.0);
    }

    #[test]
    fn keyword_rank_is_shared_by_all_chunks_of_a_document() {
        let fused = fuse(&[], &[vec![7, 8], vec![9]], Weights::default(), 10);
        let score = |id| fused.iter().find(|s| s.chunk_id == id).unwrap().total;
        assert!((score(7) - 0.4).abs() < 1e-12);
        assert!((score(8) - 0.4).abs() < 1e-12);
        assert!((score(9) - 0.4 * 0.75).abs() < 1e-12);
        // Ties break by ascending chunk id.
        assert_eq!(fused[0].chunk_id, 7);
        assert_eq!(fused[1].chunk_id, 8);
    }

    #[test]
    fn chunk_in_both_lists_sums_components() {
        let fused = fuse(&[(3, 0.5), (4, 0.9)], &[vec![4]], Weights::default(), 10);
        let four = fused.iter().find(|s| s.chunk_id == 4).unwrap();
        let expected_vector = 0.9 * 0.6 * positional_decay(1, 2);
        assert!((four.vector_score - expected_vector).abs() < 1e-12);
        assert!((four.total - (expected_vector + 0.4)).abs() < 1e-12);
        assert_eq!(fused[0].chunk_id, 4);
    }

    #[test]
    fn fuse_truncates() {
        let vector: Vec<(i64, f64)> = (1..=5).map(|i| (i, 0.5)).collect();
        assert_eq!(fuse(&vector, &[], Weights::default(), 2).len(), 2);
    }

    #[test]
    fn preview_windows_around_match() {
        let text = format!("{}needle{}", "a".repeat(80), "b".repeat(200));
        let p = preview(&text, "NEEDLE");
        assert!(p.starts_with("..."));
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 3 + 50 + 6 + 150 + 3);
        assert!(p.contains("needle"));
    }

    #[test]
    fn preview_of_short_text_has_no_markers() {
        assert_eq!(preview("Etch rate drift", "rate"), "Etch rate drift");
    }
}
