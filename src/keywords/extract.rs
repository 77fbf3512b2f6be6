//! Model-driven term extraction for a single chunk.

use crate::llm::{ChatMessage, CompletionService, ServiceError};
use crate::models::Usage;

/// Texts shorter than this (in characters, after trimming) yield no terms
/// and cost no call.
pub const MIN_TEXT_CHARS: usize = 10;

const MAX_TOKENS: u32 = 100;

pub struct TermExtractor<'a> {
    llm: &'a dyn CompletionService,
    model: String,
    temperature: f32,
}

impl<'a> TermExtractor<'a> {
    pub fn new(llm: &'a dyn CompletionService, model: &str, temperature: f32) -> Self {
        Self {
            llm,
            model: model.to_string(),
            temperature,
        }
    }

    /// Ask the model for 3-5 key terms in `text`.
    pub async fn extract_terms(&self, text: &str) -> Result<(Vec<String>, Usage), ServiceError> {
        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return Ok((Vec::new(), Usage::default()));
        }

        let messages = [
            ChatMessage::system(
                "You extract key technical terms. Reply with the terms only, separated by commas.",
            ),
            ChatMessage::user(format!(
                "List the 3 to 5 most important technical terms in this text:\n\n{}",
                text
            )),
        ];
        let completion = self
            .llm
            .complete(&messages, &self.model, self.temperature, Some(MAX_TOKENS))
            .await?;
        Ok((parse_terms(&completion.text), completion.usage))
    }
}

/// Split a model reply on `,` and `、`, trimming and dropping empties.
pub fn parse_terms(reply: &str) -> Vec<String> {
    reply
        .split([',', '、'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_both_delimiters() {
        assert_eq!(
            parse_terms(" etch rate, CVD、 particle ,, "),
            vec!["etch rate", "CVD", "particle"]
        );
        assert!(parse_terms("").is_empty());
    }
}
