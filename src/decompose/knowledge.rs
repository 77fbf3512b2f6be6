//! Knowledge schema: one encyclopedia-style card per chapter.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use super::{field_text, split_chapters, Decomposer, Decomposition, Extraction, Schema};
use crate::models::{ChunkDraft, SourceType};

pub struct KnowledgeSchema;

const KEYS: [&str; 5] = ["Topic", "Definition", "Core Content", "Key Terms", "Examples"];

fn prompt(title: &str, body: &str) -> String {
    format!(
        "Turn the chapter below into a knowledge card with five parts:\n\
         1. Topic - a clear topic name\n\
         2. Definition - one or two sentences\n\
         3. Core Content - technical details, formulas, process steps\n\
         4. Key Terms - 3 to 5 terms, comma separated\n\
         5. Examples - applications or worked examples\n\n\
         Return JSON in this shape:\n\
         {{\n  \"Topic\": \"...\",\n  \"Definition\": \"...\",\n  \"Core Content\": \"...\",\n  \
         \"Key Terms\": \"...\",\n  \"Examples\": \"...\"\n}}\n\n\
         Chapter title: {}\nChapter content:\n{}",
        title, body
    )
}

/// Concatenate the five card parts. Topic falls back to the chapter title.
fn render_card(chapter_title: &str, card: &Map<String, Value>) -> String {
    let topic = match card.get(KEYS[0]).and_then(Value::as_str).map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => chapter_title.to_string(),
    };
    format!(
        "Topic: {}\n\nDefinition: {}\n\nCore Content:\n{}\n\nKey Terms: {}\n\nExamples:\n{}",
        topic,
        field_text(card.get(KEYS[1])),
        field_text(card.get(KEYS[2])),
        field_text(card.get(KEYS[3])),
        field_text(card.get(KEYS[4])),
    )
}

#[async_trait]
impl Schema for KnowledgeSchema {
    fn source_type(&self) -> SourceType {
        SourceType::Chapter
    }

    async fn decompose(&self, ctx: &Decomposer<'_>, text: &str) -> Decomposition {
        let mut out = Decomposition::default();

        for (title, body) in split_chapters(text) {
            let (extraction, usage) = ctx.extract(prompt(&title, &body), &body).await;
            out.calls.push(usage);

            let content = match extraction {
                Extraction::Parsed(card) => render_card(&title, &card),
                Extraction::Degraded(raw) => {
                    warn!(chapter = %title, "keeping raw chapter text");
                    out.degraded = true;
                    raw
                }
            };
            out.chunks.push(ChunkDraft {
                source_type: SourceType::Chapter,
                title,
                content,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_uses_chapter_title_when_topic_missing() {
        let card: Map<String, Value> = serde_json::from_str(
            r#"{"Definition": "A ratio.", "Core Content": "x / y", "Key Terms": ["ratio", "yield"]}"#,
        )
        .unwrap();
        let text = render_card("Yield", &card);
        assert!(text.starts_with("Topic: Yield"));
        assert!(text.contains("Key Terms: ratio, yield"));
        assert!(text.contains("Examples:\nNot provided"));
    }
}
