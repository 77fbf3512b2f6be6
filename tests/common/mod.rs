//! Scripted service fakes and scratch stores shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

use knowledge_harness::decompose::DecomposeSettings;
use knowledge_harness::llm::{
    ChatMessage, Completion, CompletionService, Embedding, EmbeddingService, ServiceError,
};
use knowledge_harness::models::Usage;
use knowledge_harness::store::EmbeddingStore;
use knowledge_harness::tokens::TokenLedger;

pub const DIMS: usize = 8;

/// Completion fake. Structured-extraction calls (no `max_tokens`) pop the
/// script and fall back to `default_reply`; term-extraction calls (with
/// `max_tokens`) answer with `terms_reply`.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    default_reply: String,
    terms_reply: Result<String, ServiceError>,
    usage: Usage,
    pub extraction_calls: AtomicUsize,
    pub term_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(default_reply: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: default_reply.to_string(),
            terms_reply: Ok("contamination, particle".to_string()),
            usage: Usage::new(40, 10, 50),
            extraction_calls: AtomicUsize::new(0),
            term_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Result<&str, ServiceError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(reply.map(str::to_string));
        self
    }

    pub fn with_terms(mut self, reply: Result<&str, ServiceError>) -> Self {
        self.terms_reply = reply.map(str::to_string);
        self
    }

    pub fn extraction_calls(&self) -> usize {
        self.extraction_calls.load(Ordering::SeqCst)
    }

    pub fn term_calls(&self) -> usize {
        self.term_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Completion, ServiceError> {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }

        let reply = if max_tokens.is_some() {
            self.term_calls.fetch_add(1, Ordering::SeqCst);
            self.terms_reply.clone()
        } else {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.default_reply.clone()))
        };

        reply.map(|text| Completion {
            text,
            usage: self.usage,
        })
    }
}

/// Deterministic bag-of-words embedder. Known texts can be pinned to exact
/// vectors; everything else hashes its words into `DIMS` buckets.
pub struct FakeEmbedder {
    pinned: HashMap<String, Vec<f32>>,
    fail: bool,
    dims: usize,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            pinned: HashMap::new(),
            fail: false,
            dims: DIMS,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Advertise a dimension other than the scratch store's.
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    pub fn pin(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.pinned.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.split_whitespace() {
        let bucket = word
            .to_ascii_lowercase()
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
            % DIMS;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::Status {
                code: 503,
                body: "embedding backend down".into(),
            });
        }
        let vector = self
            .pinned
            .get(text)
            .cloned()
            .unwrap_or_else(|| bag_of_words(text));
        Ok(Embedding {
            vector,
            usage: Usage::new(7, 0, 7),
        })
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

pub fn settings() -> DecomposeSettings {
    DecomposeSettings {
        model: "test-model".into(),
        temperature: 0.0,
        raw_fallback_chars: 500,
    }
}

/// Knowledge store and token ledger in a scratch directory.
pub struct Scratch {
    pub dir: TempDir,
    pub store: EmbeddingStore,
    pub ledger: TokenLedger,
}

pub async fn scratch() -> Scratch {
    let dir = TempDir::new().unwrap();
    let store = EmbeddingStore::open(&dir.path().join("knowledge.sqlite"), DIMS)
        .await
        .unwrap();
    let ledger = TokenLedger::open(&dir.path().join("tokens.sqlite"))
        .await
        .unwrap();
    Scratch { dir, store, ledger }
}

/// Unit vector along `axis`, optionally tilted towards the next axis.
pub fn axis(axis: usize, tilt: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[axis % DIMS] = 1.0;
    v[(axis + 1) % DIMS] = tilt;
    v
}
