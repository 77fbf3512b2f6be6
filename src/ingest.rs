//! Ingestion pipeline orchestration.
//!
//! Coordinates the per-file flow: read → decompose → categorize keywords →
//! embed → store. Token usage of every model call is logged under the file
//! name.
//!
//! Failure handling per stage:
//!
//! - read errors abort the file (recorded in the batch error list);
//! - decomposition never fails; bad or missing model output degrades to raw
//!   chunks inside [`Decomposer`];
//! - a failed keyword call leaves that chunk without keywords;
//! - a failed embedding call aborts the file and removes the partially
//!   written document, so no half-ingested document is ever observable.
//!
//! Re-ingesting a file with the same name and type compares the SHA-256 of
//! its extracted text: unchanged files are skipped, changed files replace the
//! old document.

use anyhow::Context;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::decompose::{DecomposeSettings, Decomposer};
use crate::error::{Error, Result};
use crate::extract::{read_document, ExtractError};
use crate::keywords::{KeywordMap, TermExtractor};
use crate::llm::{CompletionService, EmbeddingService, OpenAiClient};
use crate::models::{AnalysisMode, ChunkDraft, DocType, NewDocument, Usage};
use crate::progress::{ProgressMode, ProgressReporter};
use crate::store::EmbeddingStore;
use crate::tokens::{TokenLedger, TokenOperation};

/// Per-run ingestion choices.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub doc_type: DocType,
    pub analysis_mode: AnalysisMode,
    /// Overrides the configured text model.
    pub model: Option<String>,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested {
        doc_id: i64,
        chunks: usize,
        degraded: bool,
    },
    /// Same name, type, and content as an existing document.
    Unchanged { doc_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

/// Partial-success result of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub success_count: usize,
    /// Successes that were skipped as unchanged.
    pub unchanged: usize,
    pub errors: Vec<FileError>,
}

pub struct Ingestor<'a> {
    store: &'a EmbeddingStore,
    llm: &'a dyn CompletionService,
    embedder: &'a dyn EmbeddingService,
    keywords: &'a KeywordMap,
    ledger: Option<&'a TokenLedger>,
    settings: DecomposeSettings,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a EmbeddingStore,
        llm: &'a dyn CompletionService,
        embedder: &'a dyn EmbeddingService,
        keywords: &'a KeywordMap,
        ledger: Option<&'a TokenLedger>,
        settings: DecomposeSettings,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            keywords,
            ledger,
            settings,
        }
    }

    /// Ingest one file end to end.
    pub async fn ingest_file(&self, path: &Path, opts: &IngestOptions) -> Result<FileOutcome> {
        self.store.ensure_dims(self.embedder.dims())?;
        let filename = file_name(path);
        let text = read_document(path)?;
        if text.trim().is_empty() {
            return Err(ExtractError::Empty.into());
        }
        let content_hash = sha256_hex(&text);

        if let Some(existing) = self.store.find_by_filename(&filename, opts.doc_type).await? {
            if existing.content_hash == content_hash {
                debug!(file = %filename, doc_id = existing.id, "unchanged, skipping");
                return Ok(FileOutcome::Unchanged {
                    doc_id: existing.id,
                });
            }
            info!(file = %filename, doc_id = existing.id, "content changed, replacing document");
            self.store.delete_document(existing.id).await?;
        }

        let mut settings = self.settings.clone();
        if let Some(model) = &opts.model {
            settings.model = model.clone();
        }

        let doc_id = self
            .store
            .create_document(&NewDocument {
                filename: filename.clone(),
                doc_type: opts.doc_type,
                analysis_mode: opts.analysis_mode,
                model_used: settings.model.clone(),
                content_hash,
            })
            .await?;

        let decomposer = Decomposer::new(self.llm, settings.clone());
        let decomposition = decomposer.decompose(opts.doc_type, &text).await;
        for usage in &decomposition.calls {
            self.track(TokenOperation::IngestionParse, &filename, *usage)
                .await;
        }

        let extractor = TermExtractor::new(self.llm, &settings.model, settings.temperature);
        if let Err(e) = self
            .write_chunks(doc_id, &filename, &decomposition.chunks, &extractor)
            .await
        {
            if let Err(cleanup) = self.store.delete_document(doc_id).await {
                warn!(doc_id, error = %cleanup, "failed to remove partially ingested document");
            }
            return Err(e);
        }

        info!(
            file = %filename,
            doc_id,
            chunks = decomposition.chunks.len(),
            degraded = decomposition.degraded,
            "ingested"
        );
        Ok(FileOutcome::Ingested {
            doc_id,
            chunks: decomposition.chunks.len(),
            degraded: decomposition.degraded,
        })
    }

    async fn write_chunks(
        &self,
        doc_id: i64,
        filename: &str,
        chunks: &[ChunkDraft],
        extractor: &TermExtractor<'_>,
    ) -> Result<()> {
        for chunk in chunks {
            let tags = match extractor.extract_terms(&chunk.content).await {
                Ok((terms, usage)) => {
                    self.track(TokenOperation::IngestionKeywords, filename, usage)
                        .await;
                    self.keywords.categorize(&terms)
                }
                Err(e) => {
                    warn!(file = %filename, title = %chunk.title, error = %e, "keyword extraction failed");
                    Vec::new()
                }
            };

            let embedding = self.embedder.embed(&chunk.content).await?;
            self.track(TokenOperation::IngestionEmbedding, filename, embedding.usage)
                .await;

            self.store
                .put(
                    doc_id,
                    chunk.source_type,
                    &chunk.title,
                    &chunk.content,
                    Some(embedding.vector.as_slice()),
                    &tags,
                )
                .await?;
        }
        Ok(())
    }

    /// Ingest every matching file directly inside `dir`, in filename order.
    /// Per-file failures are collected; only an unreadable directory or a bad
    /// extension filter fails the whole batch.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        opts: &IngestOptions,
        extensions: &[String],
        progress: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        let files = scan_directory(dir, extensions)?;
        let total = files.len();
        let mut report = BatchReport::default();

        for (i, path) in files.iter().enumerate() {
            let name = file_name(path);
            progress.report(i + 1, total, &name);
            report.processed += 1;

            match self.ingest_file(path, opts).await {
                Ok(outcome) => {
                    report.success_count += 1;
                    if matches!(outcome, FileOutcome::Unchanged { .. }) {
                        report.unchanged += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(file = %name, error = %e, "ingestion failed");
                    report.errors.push(FileError {
                        file: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn track(&self, operation: TokenOperation, filename: &str, usage: Usage) {
        if let Some(ledger) = self.ledger {
            if let Err(e) = ledger.record(operation, Some(filename), usage).await {
                warn!(operation = %operation, error = %e, "failed to record token usage");
            }
        }
    }
}

/// Files directly inside `dir` whose names match the extension filter,
/// sorted by filename. Entries are bare extensions (`pdf`) or glob patterns.
pub fn scan_directory(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    let filter = build_filter(extensions)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if filter.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn build_filter(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim().trim_start_matches('.');
        if ext.is_empty() {
            continue;
        }
        let pattern = if ext.contains(['*', '?', '[', '{']) {
            ext.to_string()
        } else {
            format!("*.{}", ext)
        };
        let glob = GlobBuilder::new(&pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid extension filter '{}': {}", ext, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid extension filter: {}", e)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Run `kh ingest` over a directory (or a single file) and print a summary.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    opts: IngestOptions,
    extensions: Option<Vec<String>>,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let store = EmbeddingStore::open(&config.db.path, config.embedding.dims)
        .await
        .context("opening knowledge store")?;
    let ledger = TokenLedger::open(&config.db.token_path())
        .await
        .context("opening token log")?;
    let keywords = KeywordMap::load(&config.keywords.path).context("loading keyword mapping")?;
    let client = OpenAiClient::from_config(config)?;

    let ingestor = Ingestor::new(
        &store,
        &client,
        &client,
        &keywords,
        Some(&ledger),
        DecomposeSettings::from_config(config),
    );

    println!("ingest {}", path.display());
    if path.is_file() {
        match ingestor.ingest_file(path, &opts).await? {
            FileOutcome::Ingested {
                doc_id,
                chunks,
                degraded,
            } => {
                println!("  document: {}", doc_id);
                println!("  chunks written: {}", chunks);
                if degraded {
                    println!("  degraded: yes (raw content kept)");
                }
            }
            FileOutcome::Unchanged { doc_id } => {
                println!("  unchanged (document {})", doc_id);
            }
        }
    } else {
        let extensions = extensions.unwrap_or_else(|| config.ingest.extensions.clone());
        let reporter = progress.reporter();
        let report = ingestor
            .ingest_directory(path, &opts, &extensions, reporter.as_ref())
            .await?;

        println!("  files: {}", report.processed);
        println!("  succeeded: {}", report.success_count);
        println!("  unchanged: {}", report.unchanged);
        println!("  failed: {}", report.errors.len());
        for err in &report.errors {
            println!("    {}: {}", err.file, err.error);
        }
    }
    println!("ok");

    ledger.pool().close().await;
    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_is_flat_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.TXT"), "a").unwrap();
        std::fs::write(dir.path().join("c.png"), "c").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("d.md"), "d").unwrap();

        let files = scan_directory(dir.path(), &["md".into(), ".txt".into()]).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.TXT", "b.md"]);
    }

    #[test]
    fn scan_accepts_glob_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes-1.md"), "x").unwrap();
        std::fs::write(dir.path().join("other.md"), "x").unwrap();
        let files = scan_directory(dir.path(), &["notes-*.md".into()]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn scan_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_directory(&dir.path().join("nope"), &["md".into()]).is_err());
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
