//! Schema-guided decomposition of document text into typed, titled chunks.
//!
//! Every [`DocType`] maps to one [`Schema`] through [`schema_for`]:
//!
//! | Doc type | Schema | Chunk type | LLM calls |
//! |----------|--------|------------|-----------|
//! | Troubleshooting | six fixed fields | `field` | one |
//! | Training | five fixed fields | `section` | one |
//! | Knowledge | five sub-fields per chapter | `chapter` | one per chapter |
//! | Procedure | heading split, verbatim | `step` | none |
//!
//! Model output is recovered with [`json::extract_json_object`]. When the
//! call fails or no JSON object can be recovered the schema degrades to a
//! raw-content chunk instead of aborting, so decomposition itself never fails.
//! All chunks pass through [`validate`] before they are returned.

pub mod json;

mod fixed;
mod knowledge;
mod procedure;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::{ChatMessage, CompletionService};
use crate::models::{ChunkDraft, DocType, SourceType, Usage};

pub use json::extract_json_object;

/// Value substituted for a canonical field the model left out or left empty.
pub const PLACEHOLDER: &str = "Not provided";

/// Title of a degraded chunk for the single-call schemas.
pub const RAW_TITLE: &str = "raw";

const SYSTEM_PROMPT: &str =
    "You convert technical documents into structured records. Reply with one JSON object only.";

/// Outcome of one structured extraction call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed(Map<String, Value>),
    /// Holds the raw input the call was made for.
    Degraded(String),
}

/// Decomposer output, plus per-call token usage for the caller to record.
#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    pub chunks: Vec<ChunkDraft>,
    pub calls: Vec<Usage>,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct DecomposeSettings {
    pub model: String,
    pub temperature: f32,
    pub raw_fallback_chars: usize,
}

impl DecomposeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.text_model.clone(),
            temperature: config.llm.temperature,
            raw_fallback_chars: config.ingest.raw_fallback_chars,
        }
    }
}

/// Shared interface implemented by every decomposition schema.
#[async_trait]
pub trait Schema: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn decompose(&self, ctx: &Decomposer<'_>, text: &str) -> Decomposition;
}

/// Strategy table from document type to schema.
pub fn schema_for(doc_type: DocType) -> &'static dyn Schema {
    match doc_type {
        DocType::Troubleshooting => &fixed::TROUBLESHOOTING,
        DocType::Training => &fixed::TRAINING,
        DocType::Knowledge => &knowledge::KnowledgeSchema,
        DocType::Procedure => &procedure::ProcedureSchema,
    }
}

pub struct Decomposer<'a> {
    llm: &'a dyn CompletionService,
    settings: DecomposeSettings,
}

impl<'a> Decomposer<'a> {
    pub fn new(llm: &'a dyn CompletionService, settings: DecomposeSettings) -> Self {
        Self { llm, settings }
    }

    /// Decompose `text` according to the schema for `doc_type`.
    pub async fn decompose(&self, doc_type: DocType, text: &str) -> Decomposition {
        let mut out = schema_for(doc_type).decompose(self, text).await;
        out.chunks = validate(out.chunks);
        debug!(
            doc_type = %doc_type,
            chunks = out.chunks.len(),
            degraded = out.degraded,
            "decomposed document"
        );
        out
    }

    /// Send `prompt` and recover a JSON object from the reply. Any failure
    /// becomes [`Extraction::Degraded`] carrying `raw`.
    async fn extract(&self, prompt: String, raw: &str) -> (Extraction, Usage) {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        match self
            .llm
            .complete(
                &messages,
                &self.settings.model,
                self.settings.temperature,
                None,
            )
            .await
        {
            Ok(completion) => match extract_json_object(&completion.text) {
                Some(fields) => (Extraction::Parsed(fields), completion.usage),
                None => {
                    let head: String = completion.text.chars().take(200).collect();
                    warn!(response = %head, "no JSON object in model response, degrading to raw content");
                    (Extraction::Degraded(raw.to_string()), completion.usage)
                }
            },
            Err(e) => {
                warn!(error = %e, "extraction call failed, degrading to raw content");
                (Extraction::Degraded(raw.to_string()), Usage::default())
            }
        }
    }

    fn raw_limit(&self) -> usize {
        self.settings.raw_fallback_chars
    }
}

/// Single chunk carrying truncated raw input.
pub fn degraded_chunk(source_type: SourceType, raw: &str, limit: usize) -> ChunkDraft {
    ChunkDraft {
        source_type,
        title: RAW_TITLE.to_string(),
        content: truncate_with_marker(raw, limit),
    }
}

/// Cut to `limit` characters and append `...` when anything was cut.
pub fn truncate_with_marker(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// Collapse whitespace runs to one space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize every chunk's content and drop chunks left empty.
pub fn validate(chunks: Vec<ChunkDraft>) -> Vec<ChunkDraft> {
    chunks
        .into_iter()
        .filter_map(|mut chunk| {
            chunk.content = normalize_whitespace(&chunk.content);
            chunk.title = chunk.title.trim().to_string();
            if chunk.content.is_empty() {
                None
            } else {
                Some(chunk)
            }
        })
        .collect()
}

/// Render a JSON field value as chunk text. Missing, null and blank values
/// become [`PLACEHOLDER`].
pub(crate) fn field_text(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    };

    if normalize_whitespace(&text).is_empty() {
        PLACEHOLDER.to_string()
    } else {
        text
    }
}

/// Split text into `(title, body)` sections on heading lines.
///
/// A line starting with `---` or `# ` opens a new section; its title is the
/// line with the markers stripped, or `Chapter N` when nothing remains.
/// Lines before the first heading form a section titled `Main content`.
/// Sections with no body lines are skipped. When no section is found the
/// whole text is returned as one section titled `Full content`.
pub fn split_chapters(text: &str) -> Vec<(String, String)> {
    let mut chapters: Vec<(String, String)> = Vec::new();
    let mut title = "Main content".to_string();
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with("---") || line.starts_with("# ") {
            if !body.is_empty() {
                chapters.push((title, body.join("\n")));
            }
            title = line.replace("---", "").replace('#', "").trim().to_string();
            if title.is_empty() {
                title = format!("Chapter {}", chapters.len() + 1);
            }
            body.clear();
        } else {
            body.push(line);
        }
    }
    if !body.is_empty() {
        chapters.push((title, body.join("\n")));
    }

    if chapters.is_empty() {
        chapters.push(("Full content".to_string(), text.to_string()));
    }
    chapters
}
