//! OpenAI-compatible HTTP client.
//!
//! Calls `POST {base_url}/chat/completions` and `POST {base_url}/embeddings`.
//! Usage counts are read from the `usage` object and zeroed when absent.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{
    prepare_embedding_input, with_retry, ChatMessage, Completion, CompletionService, Embedding,
    EmbeddingService, RetryPolicy, ServiceError,
};
use crate::config::{Config, EmbeddingConfig, LlmConfig};
use crate::models::Usage;

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    dims: usize,
    max_input_chars: usize,
    retry: RetryPolicy,
}

impl OpenAiClient {
    /// Build a client from configuration, reading the API key from the
    /// environment variable named by `llm.api_key_env`.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&config.llm.api_key_env)
            .map_err(|_| ServiceError::MissingApiKey(config.llm.api_key_env.clone()))?;
        Self::new(&config.llm.base_url, &api_key, &config.llm, &config.embedding)
    }

    pub fn new(
        base_url: &str,
        api_key: &str,
        llm: &LlmConfig,
        embedding: &EmbeddingConfig,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            embedding_model: embedding.model.clone(),
            dims: embedding.dims,
            max_input_chars: embedding.max_input_chars,
            retry: RetryPolicy::from_config(llm),
        })
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let url = url.as_str();
        let http = &self.http;
        let api_key = self.api_key.as_str();

        with_retry(&self.retry, endpoint, || async move {
            let response = http
                .post(url)
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| ServiceError::InvalidResponse(e.to_string()));
            }

            let body_text = response.text().await.unwrap_or_default();
            Err(ServiceError::Status {
                code: status.as_u16(),
                body: body_text,
            })
        })
        .await
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Completion, ServiceError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });
        if let Some(max) = max_tokens {
            body["max_tokens"] = Value::from(max);
        }

        let json = self.post_json("chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Embedding, ServiceError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": prepare_embedding_input(text, self.max_input_chars),
        });

        let json = self.post_json("embeddings", &body).await?;
        let embedding = parse_embedding_response(&json)?;
        if embedding.vector.len() != self.dims() {
            return Err(ServiceError::InvalidResponse(format!(
                "embedding has {} values, expected {}",
                embedding.vector.len(),
                self.dims()
            )));
        }
        Ok(embedding)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_chat_response(json: &Value) -> Result<Completion, ServiceError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::InvalidResponse("missing choices[0].message.content".into()))?;

    Ok(Completion {
        text: text.to_string(),
        usage: parse_usage(json),
    })
}

fn parse_embedding_response(json: &Value) -> Result<Embedding, ServiceError> {
    let values = json
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::InvalidResponse("missing data[0].embedding".into()))?;

    let vector = values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ServiceError::InvalidResponse("non-numeric embedding value".into()))
        })
        .collect::<Result<Vec<f32>, _>>()?;

    Ok(Embedding {
        vector,
        usage: parse_usage(json),
    })
}

fn parse_usage(json: &Value) -> Usage {
    let usage = json.get("usage");
    let field = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    let prompt = field("prompt_tokens");
    let completion = field("completion_tokens");
    let total = match field("total_tokens") {
        0 => prompt + completion,
        t => t,
    };
    Usage::new(prompt, completion, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiClient {
        let llm = LlmConfig {
            retry_base_ms: 0,
            ..LlmConfig::default()
        };
        let embedding = EmbeddingConfig {
            dims: 3,
            max_input_chars: 10,
            ..EmbeddingConfig::default()
        };
        OpenAiClient::new(&server.uri(), "sk-test", &llm, &embedding).unwrap()
    }

    fn chat_body(content: &str) -> Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17 }
        })
    }

    #[tokio::test]
    async fn completion_returns_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello")))
            .expect(1)
            .mount(&server)
            .await;

        let out = client(&server)
            .complete(&[ChatMessage::user("hi")], "gpt-test", 0.3, None)
            .await
            .unwrap();
        assert_eq!(out.text, "hello");
        assert_eq!(out.usage, Usage::new(12, 5, 17));
    }

    #[tokio::test]
    async fn missing_usage_is_zeroed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "ok" } }]
            })))
            .mount(&server)
            .await;

        let out = client(&server)
            .complete(&[ChatMessage::user("hi")], "gpt-test", 0.3, Some(64))
            .await
            .unwrap();
        assert_eq!(out.usage, Usage::default());
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("second")))
            .mount(&server)
            .await;

        let out = client(&server)
            .complete(&[ChatMessage::user("hi")], "gpt-test", 0.3, None)
            .await
            .unwrap();
        assert_eq!(out.text, "second");
    }

    #[tokio::test]
    async fn client_error_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .complete(&[ChatMessage::user("hi")], "gpt-test", 0.3, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Status {
                code: 401,
                body: "bad key".into()
            }
        );
    }

    #[tokio::test]
    async fn embedding_input_is_flattened_and_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({ "input": "line one l" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.5, -0.25, 1.0] }],
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = client(&server)
            .embed("line one\nline two")
            .await
            .unwrap();
        assert_eq!(out.vector, vec![0.5, -0.25, 1.0]);
        assert_eq!(out.usage, Usage::new(4, 0, 4));
    }

    #[tokio::test]
    async fn malformed_embedding_response_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let err = client(&server).embed("text").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn embedding_of_wrong_width_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3, 0.4] }]
            })))
            .mount(&server)
            .await;

        let err = client(&server).embed("text").await.unwrap_err();
        match err {
            ServiceError::InvalidResponse(msg) => assert!(msg.contains("expected 3")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
