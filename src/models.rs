//! Core data models used throughout the knowledge harness.
//!
//! These types represent the documents, chunks, and token usage that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kind of document being ingested. Selects the decomposition schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    Knowledge,
    Training,
    Procedure,
    Troubleshooting,
}

impl DocType {
    pub const ALL: [DocType; 4] = [
        DocType::Knowledge,
        DocType::Training,
        DocType::Procedure,
        DocType::Troubleshooting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Knowledge => "Knowledge",
            DocType::Training => "Training",
            DocType::Procedure => "Procedure",
            DocType::Troubleshooting => "Troubleshooting",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownVariant {
                kind: "doc type",
                value: s.to_string(),
            })
    }
}

/// Structural role of a chunk inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Chapter,
    Section,
    Field,
    Step,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Chapter => "chapter",
            SourceType::Section => "section",
            SourceType::Field => "field",
            SourceType::Step => "step",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chapter" => Ok(SourceType::Chapter),
            "section" => Ok(SourceType::Section),
            "field" => Ok(SourceType::Field),
            "step" => Ok(SourceType::Step),
            _ => Err(Error::UnknownVariant {
                kind: "source type",
                value: s.to_string(),
            }),
        }
    }
}

/// How the document was analysed. Recorded on the document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    TextOnly,
    Vision,
    Auto,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::TextOnly => "text_only",
            AnalysisMode::Vision => "vision",
            AnalysisMode::Auto => "auto",
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text_only" | "text-only" | "text" => Ok(AnalysisMode::TextOnly),
            "vision" => Ok(AnalysisMode::Vision),
            "auto" => Ok(AnalysisMode::Auto),
            _ => Err(Error::UnknownVariant {
                kind: "analysis mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Fields needed to create a document row.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub doc_type: DocType,
    pub analysis_mode: AnalysisMode,
    pub model_used: String,
    pub content_hash: String,
}

/// Document stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub doc_type: DocType,
    /// Unix timestamp (seconds).
    pub upload_date: i64,
    pub analysis_mode: String,
    pub model_used: String,
    pub content_hash: String,
}

/// A typed, titled unit produced by the decomposer, before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
}

/// A chunk row read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub source_type: SourceType,
    pub title: String,
    pub text_content: String,
    pub keywords: Vec<String>,
    pub has_embedding: bool,
    pub created_at: i64,
}

/// Token usage reported by the completion and embedding services.
///
/// Zeroed when the service does not report usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl Usage {
    pub fn new(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            prompt,
            completion,
            total,
        }
    }
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
