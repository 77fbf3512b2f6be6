//! Fixed-field schemas: one call, one chunk per canonical field.

use async_trait::async_trait;

use super::{degraded_chunk, field_text, Decomposer, Decomposition, Extraction, Schema};
use crate::models::{ChunkDraft, SourceType};

pub struct FixedFieldSchema {
    pub source_type: SourceType,
    pub role: &'static str,
    pub fields: &'static [(&'static str, &'static str)],
}

pub static TROUBLESHOOTING: FixedFieldSchema = FixedFieldSchema {
    source_type: SourceType::Field,
    role: "a quality engineer reviewing an incident report",
    fields: &[
        ("Problem issue & loss", "the issue and the loss it caused"),
        ("Problem description", "what happened, where and when"),
        ("Analysis root cause", "the root cause analysis"),
        ("Containment action", "immediate containment taken"),
        ("Corrective action", "corrective action for the root cause"),
        ("Preventive action", "measures preventing recurrence"),
    ],
};

pub static TRAINING: FixedFieldSchema = FixedFieldSchema {
    source_type: SourceType::Section,
    role: "an instructional designer summarising training material",
    fields: &[
        ("Target Audience", "who the training is for"),
        ("Learning Objectives", "what learners will be able to do"),
        ("Prerequisites", "knowledge or skills required beforehand"),
        ("Core Modules", "the main modules and their content"),
        ("Quiz/Assessment", "how learning is assessed"),
    ],
};

impl FixedFieldSchema {
    fn prompt(&self, text: &str) -> String {
        let list: String = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, (name, hint))| format!("{}. {} ({})\n", i + 1, name, hint))
            .collect();
        let template: String = self
            .fields
            .iter()
            .map(|(name, _)| format!("  \"{}\": \"...\"", name))
            .collect::<Vec<_>>()
            .join(",\n");

        format!(
            "You are {}. Organise the document below into these {} fields. \
             If the document does not cover a field, leave it empty.\n\n\
             {}\nReturn JSON in this shape:\n{{\n{}\n}}\n\nDocument:\n{}",
            self.role,
            self.fields.len(),
            list,
            template,
            text
        )
    }
}

#[async_trait]
impl Schema for FixedFieldSchema {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn decompose(&self, ctx: &Decomposer<'_>, text: &str) -> Decomposition {
        let (extraction, usage) = ctx.extract(self.prompt(text), text).await;

        let (chunks, degraded) = match extraction {
            Extraction::Parsed(map) => (
                self.fields
                    .iter()
                    .map(|(name, _)| ChunkDraft {
                        source_type: self.source_type,
                        title: name.to_string(),
                        content: field_text(map.get(*name)),
                    })
                    .collect(),
                false,
            ),
            Extraction::Degraded(raw) => (
                vec![degraded_chunk(self.source_type, &raw, ctx.raw_limit())],
                true,
            ),
        };

        Decomposition {
            chunks,
            calls: vec![usage],
            degraded,
        }
    }
}
