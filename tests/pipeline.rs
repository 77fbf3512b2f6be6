mod common;

use std::sync::Mutex;

use common::{scratch, settings, FakeEmbedder, ScriptedLlm};
use knowledge_harness::decompose::{Decomposer, PLACEHOLDER, RAW_TITLE};
use knowledge_harness::error::Error;
use knowledge_harness::ingest::{FileOutcome, IngestOptions, Ingestor};
use knowledge_harness::keywords::{Category, KeywordMap};
use knowledge_harness::llm::ServiceError;
use knowledge_harness::models::{AnalysisMode, DocType, SourceType};

fn opts(doc_type: DocType) -> IngestOptions {
    IngestOptions {
        doc_type,
        analysis_mode: AnalysisMode::TextOnly,
        model: None,
    }
}

fn keyword_map() -> KeywordMap {
    KeywordMap::in_memory(vec![Category {
        name: "defect".into(),
        terms: vec!["particle".into()],
    }])
}

#[tokio::test]
async fn troubleshooting_with_only_root_cause_yields_six_chunks() {
    let llm = ScriptedLlm::new("```json\n{\"Analysis root cause\": \"contamination\"}\n```");
    let decomposer = Decomposer::new(&llm, settings());

    let out = decomposer
        .decompose(DocType::Troubleshooting, "root cause: contamination")
        .await;

    assert!(!out.degraded);
    assert_eq!(out.chunks.len(), 6);
    assert!(out.chunks.iter().all(|c| c.source_type == SourceType::Field));
    let placeholders = out.chunks.iter().filter(|c| c.content == PLACEHOLDER).count();
    assert_eq!(placeholders, 5);
    let root = out
        .chunks
        .iter()
        .find(|c| c.title == "Analysis root cause")
        .unwrap();
    assert_eq!(root.content, "contamination");
    assert_eq!(out.calls.len(), 1);
}

#[tokio::test]
async fn training_always_has_five_sections() {
    let llm = ScriptedLlm::new(
        "Here you go: {\"Target Audience\": \"new operators\", \"Core Modules\": [\"safety\", \"loading\"]} hope it helps",
    );
    let decomposer = Decomposer::new(&llm, settings());

    let out = decomposer.decompose(DocType::Training, "training deck").await;

    assert_eq!(out.chunks.len(), 5);
    assert_eq!(out.chunks[0].content, "new operators");
    assert_eq!(out.chunks[3].content, "safety, loading");
    assert_eq!(out.chunks[4].content, PLACEHOLDER);
}

#[tokio::test]
async fn unparseable_reply_degrades_to_truncated_raw_chunk() {
    let llm = ScriptedLlm::new("I could not find any structure, sorry.");
    let decomposer = Decomposer::new(&llm, settings());
    let text = "word ".repeat(200);

    let out = decomposer.decompose(DocType::Troubleshooting, &text).await;

    assert!(out.degraded);
    assert_eq!(out.chunks.len(), 1);
    assert_eq!(out.chunks[0].title, RAW_TITLE);
    assert_eq!(out.chunks[0].source_type, SourceType::Field);
    assert!(out.chunks[0].content.ends_with("..."));
}

#[tokio::test]
async fn service_failure_degrades_instead_of_failing() {
    let llm = ScriptedLlm::new("{}").then(Err(ServiceError::Status {
        code: 401,
        body: "bad key".into(),
    }));
    let decomposer = Decomposer::new(&llm, settings());

    let out = decomposer
        .decompose(DocType::Training, "short training text")
        .await;

    assert!(out.degraded);
    assert_eq!(out.chunks.len(), 1);
    assert_eq!(out.chunks[0].content, "short training text");
}

#[tokio::test]
async fn knowledge_makes_one_call_and_chunk_per_chapter() {
    let llm = ScriptedLlm::new("not json")
        .then(Ok(r#"{"Topic": "Etching", "Definition": "Removing material", "Core Content": "Wet and dry", "Key Terms": ["plasma"], "Examples": "RIE"}"#))
        .then(Ok("garbage"));
    let decomposer = Decomposer::new(&llm, settings());

    let out = decomposer
        .decompose(
            DocType::Knowledge,
            "# Etch basics\nEtching removes material.\n# Deposition\nCVD grows films.",
        )
        .await;

    assert_eq!(llm.extraction_calls(), 2);
    assert_eq!(out.chunks.len(), 2);
    assert!(out.chunks.iter().all(|c| c.source_type == SourceType::Chapter));
    assert!(out.chunks[0].content.starts_with("Topic: Etching"));
    assert!(out.chunks[0].content.contains("Key Terms: plasma"));
    // The second chapter degraded and keeps its own raw text.
    assert_eq!(out.chunks[1].title, "Deposition");
    assert_eq!(out.chunks[1].content, "CVD grows films.");
}

#[tokio::test]
async fn procedure_sections_become_steps_without_calls() {
    let llm = ScriptedLlm::new("{}");
    let decomposer = Decomposer::new(&llm, settings());

    let out = decomposer
        .decompose(
            DocType::Procedure,
            "--- Slide 1 ---\nPower on the tool\n--- Slide 2 ---\nLoad the wafer",
        )
        .await;

    assert_eq!(llm.extraction_calls(), 0);
    assert_eq!(out.chunks.len(), 2);
    assert_eq!(out.chunks[1].source_type, SourceType::Step);
    assert_eq!(out.chunks[1].title, "Slide 2");
    assert_eq!(out.chunks[1].content, "Load the wafer");
}

#[tokio::test]
async fn ingest_file_stores_embedded_tagged_chunks_and_logs_usage() {
    let s = scratch().await;
    let llm = ScriptedLlm::new(r#"{"Analysis root cause": "particle contamination in chamber"}"#);
    let embedder = FakeEmbedder::new();
    let map = keyword_map();
    let ingestor = Ingestor::new(&s.store, &llm, &embedder, &map, Some(&s.ledger), settings());

    let path = s.dir.path().join("incident-42.md");
    std::fs::write(&path, "root cause: particle contamination in chamber").unwrap();

    let outcome = ingestor
        .ingest_file(&path, &opts(DocType::Troubleshooting))
        .await
        .unwrap();
    let FileOutcome::Ingested { doc_id, chunks, degraded } = outcome else {
        panic!("expected a fresh ingestion, got {:?}", outcome);
    };
    assert_eq!(chunks, 6);
    assert!(!degraded);

    let doc = s.store.get_document(doc_id).await.unwrap().unwrap();
    assert_eq!(doc.filename, "incident-42.md");
    assert_eq!(doc.model_used, "test-model");
    assert_eq!(doc.analysis_mode, "text_only");

    let stored = s.store.get_by_doc(doc_id).await.unwrap();
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|c| c.has_embedding));
    let root = stored.iter().find(|c| c.title == "Analysis root cause").unwrap();
    assert_eq!(root.keywords, vec!["generic:contamination", "defect:particle"]);
    assert_eq!(
        stored.iter().filter(|c| c.text_content == PLACEHOLDER).count(),
        5
    );

    let stats = s.ledger.stats(None).await.unwrap();
    let ops: Vec<&str> = stats.by_operation.iter().map(|o| o.operation.as_str()).collect();
    assert!(ops.contains(&"ingestion_parse"));
    assert!(ops.contains(&"ingestion_keywords"));
    assert!(ops.contains(&"ingestion_embedding"));
    assert_eq!(stats.top_files[0].file_name, "incident-42.md");
}

#[tokio::test]
async fn reingest_skips_unchanged_and_replaces_changed() {
    let s = scratch().await;
    let llm = ScriptedLlm::new(r#"{"Problem description": "pump tripped"}"#);
    let embedder = FakeEmbedder::new();
    let map = keyword_map();
    let ingestor = Ingestor::new(&s.store, &llm, &embedder, &map, None, settings());

    let path = s.dir.path().join("pump.txt");
    std::fs::write(&path, "the pump tripped twice").unwrap();
    let first = ingestor
        .ingest_file(&path, &opts(DocType::Troubleshooting))
        .await
        .unwrap();
    let FileOutcome::Ingested { doc_id: first_id, .. } = first else {
        panic!("expected ingestion");
    };

    let again = ingestor
        .ingest_file(&path, &opts(DocType::Troubleshooting))
        .await
        .unwrap();
    assert_eq!(again, FileOutcome::Unchanged { doc_id: first_id });
    assert_eq!(llm.extraction_calls(), 1);

    std::fs::write(&path, "the pump tripped three times").unwrap();
    let changed = ingestor
        .ingest_file(&path, &opts(DocType::Troubleshooting))
        .await
        .unwrap();
    let FileOutcome::Ingested { doc_id: second_id, .. } = changed else {
        panic!("expected re-ingestion");
    };
    assert_ne!(first_id, second_id);
    assert!(s.store.get_document(first_id).await.unwrap().is_none());
    assert!(s.store.get_by_doc(first_id).await.unwrap().is_empty());
    assert_eq!(s.store.list_documents(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn embedding_failure_leaves_no_document_behind() {
    let s = scratch().await;
    let llm = ScriptedLlm::new(r#"{"Target Audience": "operators"}"#);
    let embedder = FakeEmbedder::failing();
    let map = keyword_map();
    let ingestor = Ingestor::new(&s.store, &llm, &embedder, &map, None, settings());

    let path = s.dir.path().join("course.md");
    std::fs::write(&path, "operator training").unwrap();

    let err = ingestor
        .ingest_file(&path, &opts(DocType::Training))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
    assert!(s.store.list_documents(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_stops_when_embedder_and_store_disagree_on_dimension() {
    let s = scratch().await;
    let llm = ScriptedLlm::new(r#"{"Target Audience": "operators"}"#);
    let embedder = FakeEmbedder::new().with_dims(3);
    let map = keyword_map();
    let ingestor = Ingestor::new(&s.store, &llm, &embedder, &map, None, settings());

    let docs = s.dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("a.md"), "first course outline").unwrap();
    std::fs::write(docs.join("b.md"), "second course outline").unwrap();
    let exts = vec!["md".to_string()];

    let err = ingestor
        .ingest_directory(&docs, &opts(DocType::Training), &exts, &|_: usize, _: usize, _: &str| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { actual: 3, .. }));
    assert_eq!(llm.extraction_calls(), 0);
    assert_eq!(embedder.calls(), 0);
    assert!(s.store.list_documents(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn keyword_failure_keeps_chunks_without_keywords() {
    let s = scratch().await;
    let llm = ScriptedLlm::new(r#"{"Target Audience": "new maintenance technicians"}"#)
        .with_terms(Err(ServiceError::Unreachable("timeout".into())));
    let embedder = FakeEmbedder::new();
    let map = keyword_map();
    let ingestor = Ingestor::new(&s.store, &llm, &embedder, &map, None, settings());

    let path = s.dir.path().join("course.md");
    std::fs::write(&path, "maintenance training").unwrap();

    let outcome = ingestor
        .ingest_file(&path, &opts(DocType::Training))
        .await
        .unwrap();
    let FileOutcome::Ingested { doc_id, .. } = outcome else {
        panic!("expected ingestion");
    };
    let chunks = s.store.get_by_doc(doc_id).await.unwrap();
    assert_eq!(chunks.len(), 5);
    assert!(chunks.iter().all(|c| c.keywords.is_empty()));
    assert!(llm.term_calls() >= 1);
}

#[tokio::test]
async fn batch_collects_per_file_errors_and_reports_progress() {
    let s = scratch().await;
    let llm = ScriptedLlm::new(r#"{"Problem description": "alarm"}"#);
    let embedder = FakeEmbedder::new();
    let map = keyword_map();
    let ingestor = Ingestor::new(&s.store, &llm, &embedder, &map, None, settings());

    let docs = s.dir.path().join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("a.md"), "first alarm report").unwrap();
    std::fs::write(docs.join("b.txt"), "second alarm report").unwrap();
    std::fs::write(docs.join("bad.txt"), [0xff, 0xfe, 0x00, 0x41]).unwrap();
    std::fs::write(docs.join("photo.png"), b"\x89PNG").unwrap();
    std::fs::create_dir(docs.join("nested")).unwrap();
    std::fs::write(docs.join("nested").join("c.md"), "ignored").unwrap();

    let seen = Mutex::new(Vec::new());
    let progress = |current: usize, total: usize, message: &str| {
        seen.lock().unwrap().push((current, total, message.to_string()));
    };
    let exts: Vec<String> = ["md", "txt"].iter().map(|e| e.to_string()).collect();

    let report = ingestor
        .ingest_directory(&docs, &opts(DocType::Troubleshooting), &exts, &progress)
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.success_count, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].file, "bad.txt");
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (1, 3, "a.md".to_string()),
            (2, 3, "b.txt".to_string()),
            (3, 3, "bad.txt".to_string()),
        ]
    );
    assert_eq!(s.store.list_documents(None).await.unwrap().len(), 2);
}
