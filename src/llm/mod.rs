//! Completion and embedding service abstraction.
//!
//! Defines the [`CompletionService`] and [`EmbeddingService`] traits that the
//! decomposer, keyword categorizer, ingestion orchestrator and retrieval engine
//! are written against, plus the shared retry policy.
//!
//! The production implementation is [`OpenAiClient`], which talks to any
//! OpenAI-compatible `/chat/completions` and `/embeddings` endpoint.
//! Tests substitute scripted fakes.
//!
//! # Retry Strategy
//!
//! Every outbound call goes through [`with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: `retry_base_ms × 2^attempt`, exponent capped at 5

mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::LlmConfig;
use crate::models::Usage;

/// Failures surfaced by the completion and embedding services.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("service returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid service response: {0}")]
    InvalidResponse(String),

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),
}

impl ServiceError {
    /// Rate limiting, server errors, and network errors are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Unreachable(_) => true,
            ServiceError::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// One message of a chat-style completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: Usage,
}

/// Text-generation backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Completion, ServiceError>;
}

/// Embedding backend. All vectors returned by one instance share [`dims`](Self::dims).
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, ServiceError>;

    fn dims(&self) -> usize;
}

/// Collapse newlines to spaces and cut to at most `max_chars` characters.
pub fn prepare_embedding_input(text: &str, max_chars: usize) -> String {
    text.replace(['\r', '\n'], " ").chars().take(max_chars).collect()
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.min(5))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. At most `max_retries + 1` attempts are made.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    call = what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying service call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn embedding_input_is_single_line_and_bounded() {
        assert_eq!(prepare_embedding_input("a\nb\r\nc", 100), "a b  c");
        assert_eq!(prepare_embedding_input("abcdef", 3), "abc");
        assert_eq!(prepare_embedding_input("ééé", 2), "éé");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(1000));
        assert_eq!(p.delay_for(1), Duration::from_millis(2000));
        assert_eq!(p.delay_for(9), Duration::from_millis(32000));
    }

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::Unreachable("reset".into()).is_retryable());
        assert!(ServiceError::Status { code: 429, body: String::new() }.is_retryable());
        assert!(ServiceError::Status { code: 503, body: String::new() }.is_retryable());
        assert!(!ServiceError::Status { code: 401, body: String::new() }.is_retryable());
        assert!(!ServiceError::InvalidResponse("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn gives_up_after_attempt_cap() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&instant(2), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Status {
                code: 500,
                body: "boom".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&instant(2), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Status {
                code: 400,
                body: "bad".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Status { code: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&instant(2), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ServiceError::Unreachable("timeout".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
