//! Embedding store: documents, chunks and their vectors in SQLite.
//!
//! [`EmbeddingStore`] owns the knowledge database. Every vector it accepts
//! or returns has the dimension fixed at [`EmbeddingStore::open`]; that
//! dimension is written to `store_meta` on first open and a later open with
//! a different value fails with [`Error::DimensionMismatch`].
//!
//! Nearest-neighbour search is brute-force cosine similarity over every
//! embedded chunk, which is adequate for corpora of a few thousand chunks.
//!
//! Deleting a document removes its chunks first and then the document row,
//! inside one transaction, so no orphan chunk is ever observable.

pub mod codec;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::keywords;
use crate::models::{Chunk, DocType, Document, NewDocument, SourceType};

pub use codec::{blob_to_vec, cosine_similarity, decode_checked, vec_to_blob};

const DIMS_KEY: &str = "embedding_dims";

/// One nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct NearestHit {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    pub similarity: f64,
}

/// Most recent chunk of a document whose text matched a substring query.
#[derive(Debug, Clone)]
pub struct ContentMatch {
    pub document: Document,
    pub chunk_id: i64,
    pub text_content: String,
}

pub struct EmbeddingStore {
    pool: SqlitePool,
    dims: usize,
}

impl EmbeddingStore {
    /// Open (creating if needed) the knowledge database at `path`.
    pub async fn open(path: &Path, dims: usize) -> Result<Self> {
        let pool = crate::db::connect(path).await?;
        Self::from_pool(pool, dims).await
    }

    /// Wrap an existing pool, running migrations and checking the dimension.
    pub async fn from_pool(pool: SqlitePool, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::Config("embedding dimension must be > 0".into()));
        }
        crate::migrate::run_migrations(&pool).await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?")
                .bind(DIMS_KEY)
                .fetch_optional(&pool)
                .await?;

        match stored {
            Some(value) => {
                let expected = value.parse::<usize>().map_err(|_| {
                    Error::Config(format!("corrupt {} in store_meta: '{}'", DIMS_KEY, value))
                })?;
                if expected != dims {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: dims,
                    });
                }
            }
            None => {
                sqlx::query("INSERT INTO store_meta (key, value) VALUES (?, ?)")
                    .bind(DIMS_KEY)
                    .bind(dims.to_string())
                    .execute(&pool)
                    .await?;
                info!(dims, "initialised embedding store");
            }
        }

        Ok(Self { pool, dims })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fails with [`Error::DimensionMismatch`] unless `dims` is the store's dimension.
    pub fn ensure_dims(&self, dims: usize) -> Result<()> {
        if dims != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: dims,
            });
        }
        Ok(())
    }

    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        self.ensure_dims(vector.len())
    }

    // ============ Documents ============

    pub async fn create_document(&self, doc: &NewDocument) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO documents (filename, doc_type, upload_date, analysis_mode, model_used, content_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.filename)
        .bind(doc.doc_type.as_str())
        .bind(now)
        .bind(doc.analysis_mode.as_str())
        .bind(&doc.model_used)
        .bind(&doc.content_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, filename, doc_type, upload_date, analysis_mode, model_used, content_hash \
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    /// All documents, most recently uploaded first.
    pub async fn list_documents(&self, doc_type: Option<DocType>) -> Result<Vec<Document>> {
        let type_filter = doc_type.map(|t| t.as_str());
        let rows = sqlx::query(
            r#"
            SELECT id, filename, doc_type, upload_date, analysis_mode, model_used, content_hash
            FROM documents
            WHERE (? IS NULL OR doc_type = ?)
            ORDER BY upload_date DESC, id DESC
            "#,
        )
        .bind(type_filter)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    /// Most recent document with this exact filename and type.
    pub async fn find_by_filename(
        &self,
        filename: &str,
        doc_type: DocType,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, doc_type, upload_date, analysis_mode, model_used, content_hash
            FROM documents
            WHERE filename = ? AND doc_type = ?
            ORDER BY upload_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(filename)
        .bind(doc_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    /// Delete a document and all of its chunks atomically.
    /// Returns `false` when no such document exists.
    pub async fn delete_document(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let chunks = sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let docs = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            doc_id = id,
            chunks = chunks.rows_affected(),
            "deleted document"
        );
        Ok(docs.rows_affected() > 0)
    }

    // ============ Chunks ============

    /// Insert a chunk and return its id.
    pub async fn put(
        &self,
        doc_id: i64,
        source_type: SourceType,
        title: &str,
        content: &str,
        embedding: Option<&[f32]>,
        keywords: &[String],
    ) -> Result<i64> {
        if let Some(vector) = embedding {
            self.check_dims(vector)?;
        }
        let blob = embedding.map(vec_to_blob);
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO chunks (doc_id, source_type, title, text_content, embedding, keywords, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc_id)
        .bind(source_type.as_str())
        .bind(title)
        .bind(content)
        .bind(blob)
        .bind(keywords::join_keywords(keywords))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Chunks of one document in insertion order.
    pub async fn get_by_doc(&self, doc_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, doc_id, source_type, title, text_content, keywords, created_at,
                   embedding IS NOT NULL AS has_embedding
            FROM chunks
            WHERE doc_id = ?
            ORDER BY chunk_id ASC
            "#,
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    /// Delete every chunk of a document, leaving the document row.
    pub async fn delete_by_doc(&self, doc_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rank embedded chunks by cosine similarity to `query`.
    ///
    /// Ties keep ascending `chunk_id` order. Chunks without an embedding are
    /// never candidates.
    pub async fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        source_type: Option<SourceType>,
    ) -> Result<Vec<NearestHit>> {
        self.check_dims(query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let type_filter = source_type.map(|t| t.as_str());
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, doc_id, source_type, title, text_content, embedding
            FROM chunks
            WHERE embedding IS NOT NULL
              AND (? IS NULL OR source_type = ?)
            ORDER BY chunk_id ASC
            "#,
        )
        .bind(type_filter)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let vector = decode_checked(&blob, self.dims)?;
            let source_type: String = row.try_get("source_type")?;
            hits.push(NearestHit {
                chunk_id: row.try_get("chunk_id")?,
                doc_id: row.try_get("doc_id")?,
                source_type: SourceType::from_str(&source_type)?,
                title: row.try_get("title")?,
                content: row.try_get("text_content")?,
                similarity: cosine_similarity(query, &vector) as f64,
            });
        }

        // Stable sort: equal similarities stay in chunk_id order.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    // ============ Keyword support ============

    /// `(chunk_id, text_content)` for chunks with no stored keywords.
    pub async fn chunks_missing_keywords(&self) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT chunk_id, text_content FROM chunks \
             WHERE keywords IS NULL OR keywords = '' ORDER BY chunk_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<(i64, String)> {
                Ok((r.try_get("chunk_id")?, r.try_get("text_content")?))
            })
            .collect()
    }

    pub async fn update_keywords(&self, chunk_id: i64, keywords: &[String]) -> Result<()> {
        sqlx::query("UPDATE chunks SET keywords = ? WHERE chunk_id = ?")
            .bind(keywords::join_keywords(keywords))
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Substring matching ============

    /// Documents whose filename contains `query` (ASCII case-insensitive),
    /// most recently uploaded first.
    pub async fn filename_matches(
        &self,
        query: &str,
        limit: usize,
        doc_type: Option<DocType>,
    ) -> Result<Vec<Document>> {
        let type_filter = doc_type.map(|t| t.as_str());
        let rows = sqlx::query(
            r#"
            SELECT id, filename, doc_type, upload_date, analysis_mode, model_used, content_hash
            FROM documents
            WHERE filename LIKE ? ESCAPE '\'
              AND (? IS NULL OR doc_type = ?)
            ORDER BY upload_date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(like_pattern(query))
        .bind(type_filter)
        .bind(type_filter)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    /// At most one row per document: its most recent chunk whose text
    /// contains `query`. Ordered by document upload recency.
    pub async fn content_matches(
        &self,
        query: &str,
        limit: usize,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ContentMatch>> {
        let type_filter = doc_type.map(|t| t.as_str());
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.filename, d.doc_type, d.upload_date, d.analysis_mode,
                   d.model_used, d.content_hash, c.chunk_id, c.text_content
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            WHERE c.chunk_id IN (
                SELECT MAX(c2.chunk_id)
                FROM chunks c2
                JOIN documents d2 ON d2.id = c2.doc_id
                WHERE c2.text_content LIKE ? ESCAPE '\'
                  AND (? IS NULL OR d2.doc_type = ?)
                GROUP BY c2.doc_id
            )
            ORDER BY d.upload_date DESC, d.id DESC
            LIMIT ?
            "#,
        )
        .bind(like_pattern(query))
        .bind(type_filter)
        .bind(type_filter)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ContentMatch> {
                Ok(ContentMatch {
                    document: row_to_document(row)?,
                    chunk_id: row.try_get("chunk_id")?,
                    text_content: row.try_get("text_content")?,
                })
            })
            .collect()
    }

    /// Chunk counts keyed by document id.
    pub async fn chunk_counts(&self) -> Result<HashMap<i64, i64>> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT doc_id, COUNT(*) FROM chunks GROUP BY doc_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

/// `%query%` with LIKE metacharacters escaped by `\`.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let doc_type: String = row.try_get("doc_type")?;
    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        doc_type: DocType::from_str(&doc_type)?,
        upload_date: row.try_get("upload_date")?,
        analysis_mode: row.try_get("analysis_mode")?,
        model_used: row.try_get("model_used")?,
        content_hash: row.try_get("content_hash")?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let source_type: String = row.try_get("source_type")?;
    let keywords: Option<String> = row.try_get("keywords")?;
    Ok(Chunk {
        chunk_id: row.try_get("chunk_id")?,
        doc_id: row.try_get("doc_id")?,
        source_type: SourceType::from_str(&source_type)?,
        title: row.try_get("title")?,
        text_content: row.try_get("text_content")?,
        keywords: keywords::split_keywords(keywords.as_deref().unwrap_or("")),
        has_embedding: row.try_get("has_embedding")?,
        created_at: row.try_get("created_at")?,
    })
}
