//! Procedure schema: heading-split steps kept verbatim, no model call.

use async_trait::async_trait;

use super::{split_chapters, Decomposer, Decomposition, Schema};
use crate::models::{ChunkDraft, SourceType};

pub struct ProcedureSchema;

#[async_trait]
impl Schema for ProcedureSchema {
    fn source_type(&self) -> SourceType {
        SourceType::Step
    }

    async fn decompose(&self, _ctx: &Decomposer<'_>, text: &str) -> Decomposition {
        let chunks = split_chapters(text)
            .into_iter()
            .map(|(title, content)| ChunkDraft {
                source_type: SourceType::Step,
                title,
                content,
            })
            .collect();

        Decomposition {
            chunks,
            calls: Vec::new(),
            degraded: false,
        }
    }
}
