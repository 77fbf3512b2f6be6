//! Token accounting for every model call.
//!
//! Usage records are appended to a dedicated SQLite database, separate from
//! the knowledge store, and never modified afterwards. [`TokenLedger::stats`]
//! aggregates them over an optional trailing window of days.
//!
//! The ledger heals itself: if the `token_usage` table has gone missing,
//! a failed read or write re-creates the schema. Reads then return a zeroed
//! snapshot; writes are retried once.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Usage;

const TOP_FILES: i64 = 10;
const RECENT_RECORDS: i64 = 20;

/// Operation tag stored with every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOperation {
    IngestionParse,
    IngestionKeywords,
    IngestionEmbedding,
    SearchEmbedding,
}

impl TokenOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenOperation::IngestionParse => "ingestion_parse",
            TokenOperation::IngestionKeywords => "ingestion_keywords",
            TokenOperation::IngestionEmbedding => "ingestion_embedding",
            TokenOperation::SearchEmbedding => "search_embedding",
        }
    }
}

impl fmt::Display for TokenOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationTotal {
    pub operation: String,
    pub calls: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTotal {
    pub file_name: String,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRecord {
    pub timestamp: i64,
    pub file_name: Option<String>,
    pub operation: String,
    pub usage: Usage,
}

/// Aggregated token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub window_days: Option<u32>,
    pub calls: u64,
    pub totals: Usage,
    /// Descending by total tokens.
    pub by_operation: Vec<OperationTotal>,
    /// Top consumers by total tokens.
    pub top_files: Vec<FileTotal>,
    /// Most recent records first.
    pub recent: Vec<TokenRecord>,
}

pub struct TokenLedger {
    pool: SqlitePool,
}

impl TokenLedger {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::db::connect(path).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let ledger = Self { pool };
        ledger.init().await?;
        Ok(ledger)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                file_name TEXT,
                operation TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_token_usage_timestamp ON token_usage(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one usage record. Returns `false` without writing when
    /// `usage.total` is zero.
    pub async fn record(
        &self,
        operation: TokenOperation,
        file_name: Option<&str>,
        usage: Usage,
    ) -> Result<bool> {
        if usage.total == 0 {
            return Ok(false);
        }

        if let Err(e) = self.insert(operation, file_name, usage).await {
            warn!(error = %e, "token log write failed, reinitialising");
            self.init().await?;
            self.insert(operation, file_name, usage).await?;
        }
        debug!(operation = %operation, total = usage.total, "recorded token usage");
        Ok(true)
    }

    async fn insert(
        &self,
        operation: TokenOperation,
        file_name: Option<&str>,
        usage: Usage,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_usage (timestamp, file_name, operation, prompt_tokens, completion_tokens, total_tokens)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(file_name)
        .bind(operation.as_str())
        .bind(usage.prompt as i64)
        .bind(usage.completion as i64)
        .bind(usage.total as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Aggregate usage over the last `window_days` days, or all time.
    ///
    /// When the backing table is missing the schema is re-created and a
    /// zeroed snapshot is returned.
    pub async fn stats(&self, window_days: Option<u32>) -> Result<TokenStats> {
        match self.query_stats(window_days).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                warn!(error = %e, "token log unreadable, reinitialising");
                self.init().await?;
                Ok(TokenStats {
                    window_days,
                    ..TokenStats::default()
                })
            }
        }
    }

    async fn query_stats(&self, window_days: Option<u32>) -> Result<TokenStats> {
        let now = chrono::Utc::now().timestamp();
        let (since, until) = match window_days {
            Some(days) => (Some(now - i64::from(days) * 86_400), Some(now)),
            None => (None, None),
        };
        const WINDOW: &str =
            "(? IS NULL OR timestamp >= ?) AND (? IS NULL OR timestamp <= ?)";

        let totals = sqlx::query(&format!(
            "SELECT COUNT(*) AS calls, \
                    COALESCE(SUM(prompt_tokens), 0) AS prompt, \
                    COALESCE(SUM(completion_tokens), 0) AS completion, \
                    COALESCE(SUM(total_tokens), 0) AS total \
             FROM token_usage WHERE {}",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        let by_operation = sqlx::query(&format!(
            "SELECT operation, COUNT(*) AS calls, SUM(total_tokens) AS total \
             FROM token_usage WHERE {} \
             GROUP BY operation ORDER BY total DESC, operation ASC",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<OperationTotal> {
            Ok(OperationTotal {
                operation: row.try_get("operation")?,
                calls: row.try_get::<i64, _>("calls")? as u64,
                total_tokens: row.try_get::<i64, _>("total")? as u64,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let top_files = sqlx::query(&format!(
            "SELECT file_name, SUM(total_tokens) AS total \
             FROM token_usage WHERE file_name IS NOT NULL AND {} \
             GROUP BY file_name ORDER BY total DESC, file_name ASC LIMIT ?",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .bind(TOP_FILES)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<FileTotal> {
            Ok(FileTotal {
                file_name: row.try_get("file_name")?,
                total_tokens: row.try_get::<i64, _>("total")? as u64,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let recent = sqlx::query(&format!(
            "SELECT timestamp, file_name, operation, prompt_tokens, completion_tokens, total_tokens \
             FROM token_usage WHERE {} ORDER BY timestamp DESC, id DESC LIMIT ?",
            WINDOW
        ))
        .bind(since)
        .bind(since)
        .bind(until)
        .bind(until)
        .bind(RECENT_RECORDS)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<TokenRecord> {
            Ok(TokenRecord {
                timestamp: row.try_get("timestamp")?,
                file_name: row.try_get("file_name")?,
                operation: row.try_get("operation")?,
                usage: Usage::new(
                    row.try_get::<i64, _>("prompt_tokens")? as u64,
                    row.try_get::<i64, _>("completion_tokens")? as u64,
                    row.try_get::<i64, _>("total_tokens")? as u64,
                ),
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(TokenStats {
            window_days,
            calls: totals.try_get::<i64, _>("calls")? as u64,
            totals: Usage::new(
                totals.try_get::<i64, _>("prompt")? as u64,
                totals.try_get::<i64, _>("completion")? as u64,
                totals.try_get::<i64, _>("total")? as u64,
            ),
            by_operation,
            top_files,
            recent,
        })
    }
}
