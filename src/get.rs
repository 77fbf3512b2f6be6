//! Document listing, inspection, and deletion.
//!
//! Backs `kh documents`, `kh get`, and `kh delete`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::Error;
use crate::models::{format_ts_iso, Chunk, DocType, Document};
use crate::store::EmbeddingStore;

/// A document with all of its chunks.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

pub async fn get_document_detail(
    store: &EmbeddingStore,
    id: i64,
) -> crate::error::Result<DocumentDetail> {
    let Some(document) = store.get_document(id).await? else {
        return Err(Error::DocumentNotFound(id));
    };
    let chunks = store.get_by_doc(id).await?;
    Ok(DocumentDetail { document, chunks })
}

/// `kh documents`: one line per document, newest first.
pub async fn run_list(config: &Config, doc_type: Option<DocType>) -> Result<()> {
    let store = EmbeddingStore::open(&config.db.path, config.embedding.dims).await?;
    let docs = store.list_documents(doc_type).await?;
    let counts = store.chunk_counts().await?;

    if docs.is_empty() {
        println!("No documents.");
    } else {
        println!(
            "{:>6}  {:<16} {:>6}  {:<20}  {}",
            "ID", "TYPE", "CHUNKS", "UPLOADED", "FILENAME"
        );
        println!("{}", "-".repeat(76));
        for doc in &docs {
            println!(
                "{:>6}  {:<16} {:>6}  {:<20}  {}",
                doc.id,
                doc.doc_type,
                counts.get(&doc.id).copied().unwrap_or(0),
                format_ts_iso(doc.upload_date),
                doc.filename
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

/// `kh get <id>`: document metadata followed by every chunk.
pub async fn run_get(config: &Config, id: i64) -> Result<()> {
    let store = EmbeddingStore::open(&config.db.path, config.embedding.dims).await?;
    let detail = get_document_detail(&store, id).await;
    store.pool().close().await;
    let DocumentDetail { document: doc, chunks } = detail?;

    println!("--- Document ---");
    println!("id:            {}", doc.id);
    println!("filename:      {}", doc.filename);
    println!("doc_type:      {}", doc.doc_type);
    println!("uploaded:      {}", format_ts_iso(doc.upload_date));
    println!("analysis_mode: {}", doc.analysis_mode);
    println!("model:         {}", doc.model_used);
    println!("content_hash:  {}", doc.content_hash);
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!("[{} {}] {}", chunk.source_type, chunk.chunk_id, chunk.title);
        if !chunk.keywords.is_empty() {
            println!("keywords: {}", chunk.keywords.join(", "));
        }
        if !chunk.has_embedding {
            println!("(no embedding)");
        }
        println!("{}", chunk.text_content);
        println!();
    }

    Ok(())
}

/// `kh delete <id>`: remove a document and its chunks.
pub async fn run_delete(config: &Config, id: i64) -> Result<()> {
    let store = EmbeddingStore::open(&config.db.path, config.embedding.dims).await?;
    let deleted = store.delete_document(id).await;
    store.pool().close().await;

    if !deleted? {
        return Err(Error::DocumentNotFound(id).into());
    }
    println!("deleted document {}", id);
    Ok(())
}
