//! End-to-end tests for the query and automation flows, through the library
//! and over HTTP, using deterministic fake model providers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use doc_rag::automation::FileManager;
use doc_rag::cache::{CacheKey, ContentCache, FsCacheStore};
use doc_rag::config::ChunkingConfig;
use doc_rag::embedding::Embedder;
use doc_rag::generation::Generator;
use doc_rag::index::{SqliteIndex, VectorIndex};
use doc_rag::models::{ChunkMetadata, IndexEntry, RawQueryResult};
use doc_rag::pipeline::RetrievalPipeline;
use doc_rag::service::{RagError, RagService};
use doc_rag::{db, history, migrate, server};

// ─── Fakes ──────────────────────────────────────────────────────────

const VOCAB: [&str; 4] = ["rust", "python", "kubernetes", "mitochondria"];

/// Bag-of-keywords embedder: one dimension per vocabulary word plus a small
/// constant so no vector is all zeros.
#[derive(Default)]
struct KeywordEmbedder {
    calls: AtomicUsize,
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect();
    v.push(0.01);
    v
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Returns a canned reply and remembers every prompt it was given.
struct ScriptedGenerator {
    reply: Mutex<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(reply: &str) -> Self {
        Self {
            reply: Mutex::new(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.lock().unwrap().clone())
    }
}

/// Accepts writes and never returns anything.
struct BlackholeIndex;

#[async_trait]
impl VectorIndex for BlackholeIndex {
    async fn contains_ids(&self, _ids: &[String]) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    async fn upsert(&self, _entries: &[IndexEntry]) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _embedding: &[f32], _k: usize) -> Result<RawQueryResult> {
        Ok(RawQueryResult::default())
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }
}

// ─── Setup ──────────────────────────────────────────────────────────

struct Env {
    tmp: TempDir,
    service: RagService,
    embedder: Arc<KeywordEmbedder>,
    generator: Arc<ScriptedGenerator>,
}

impl Env {
    fn docs(&self) -> std::path::PathBuf {
        self.tmp.path().join("documents")
    }
}

async fn setup(reply: &str, index: Option<Arc<dyn VectorIndex>>) -> Env {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("documents");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(
        docs.join("rust.md"),
        "# Rust\n\nRust is a systems language. Rust has no garbage collector.",
    )
    .unwrap();
    std::fs::write(
        docs.join("python.txt"),
        "Python is popular for data science.\n\nPython has a large ecosystem.",
    )
    .unwrap();
    std::fs::write(
        docs.join("ops.md"),
        "Kubernetes schedules containers. Kubernetes runs on many clouds.",
    )
    .unwrap();

    let pool = db::connect_path(&tmp.path().join("data/rag.sqlite"))
        .await
        .unwrap();
    migrate::ensure_schema(&pool).await.unwrap();

    let index = index
        .unwrap_or_else(|| Arc::new(SqliteIndex::new(pool.clone())) as Arc<dyn VectorIndex>);
    let embedder = Arc::new(KeywordEmbedder::default());
    let generator = Arc::new(ScriptedGenerator::new(reply));
    let cache = ContentCache::new(
        Arc::new(FsCacheStore::new(tmp.path().join("cache"))),
        CacheKey::FileName,
    );
    let pipeline = RetrievalPipeline::new(
        cache,
        index,
        embedder.clone(),
        ChunkingConfig {
            chunk_size: 120,
            overlap: 15,
        },
        &docs,
    );
    let service = RagService::new(
        pipeline,
        generator.clone(),
        FileManager::new(&[tmp.path().join("workspace")]),
        pool,
        2,
    );

    Env {
        tmp,
        service,
        embedder,
        generator,
    }
}

// ─── Library flows ──────────────────────────────────────────────────

#[tokio::test]
async fn test_load_then_query_uses_relevant_context() {
    let env = setup("Rust has no garbage collector.", None).await;
    let report = env.service.load_documents().await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 0);

    let answer = env
        .service
        .query("Does rust use a garbage collector?", None)
        .await
        .unwrap();
    assert_eq!(answer.response, "Rust has no garbage collector.");
    assert_eq!(answer.context.len(), answer.metadata.len());
    assert!(answer.context.len() <= 2);
    assert!(answer.context[0].contains("Rust"));
    assert!(answer.metadata[0].file.ends_with("rust.md"));

    let prompt = env.generator.last_prompt();
    assert!(prompt.contains(&format!("Context: {}", answer.context.join(" "))));
    assert!(prompt.contains("Question: Does rust use a garbage collector?"));

    let history = env.service.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, history::KIND_QUERY);
    assert_eq!(history[0].response, "Rust has no garbage collector.");
}

#[tokio::test]
async fn test_reload_is_served_from_cache() {
    let env = setup("ok", None).await;
    let first = env.service.load_documents().await.unwrap();
    let calls = env.embedder.calls.load(Ordering::SeqCst);
    assert_eq!(calls, 3);

    let second = env.service.load_documents().await.unwrap();
    assert_eq!(second.chunks, first.chunks);
    assert_eq!(second.indexed, 0);
    assert_eq!(env.embedder.calls.load(Ordering::SeqCst), calls);
    assert_eq!(
        env.service.pipeline().index().count().await.unwrap(),
        first.chunks
    );
}

#[tokio::test]
async fn test_changed_file_is_reembedded_and_new_chunks_indexed() {
    let env = setup("ok", None).await;
    let path = env.docs().join("ops.md");
    let before = env.service.pipeline().process_file(&path).await.unwrap();

    std::fs::write(
        &path,
        "Kubernetes schedules containers.\n\nA much longer second paragraph about kubernetes operators, controllers, reconciliation loops, and the control plane that keeps clusters healthy.",
    )
    .unwrap();
    let after = env
        .service
        .pipeline()
        .process_file_detailed(&path)
        .await
        .unwrap();
    assert!(!after.cache_hit);
    assert!(after.chunks.len() > before.len());
    assert_eq!(after.indexed, after.chunks.len() - before.len());
}

#[tokio::test]
async fn test_blank_query_is_rejected() {
    let env = setup("unused", None).await;
    let err = env.service.query("   ", None).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyQuery));
    assert_eq!(env.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_index_without_file_has_no_relevant_documents() {
    let env = setup("unused", None).await;
    let err = env.service.query("anything?", None).await.unwrap_err();
    assert!(matches!(err, RagError::NoRelevantDocuments));
    assert!(env.service.history(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_falls_back_to_file_chunks_when_retrieval_is_empty() {
    let env = setup("Python.", Some(Arc::new(BlackholeIndex) as Arc<dyn VectorIndex>)).await;
    let path = env.docs().join("python.txt");

    let answer = env
        .service
        .query("What is python used for?", Some(&path))
        .await
        .unwrap();
    assert!(!answer.context.is_empty());
    assert!(answer.context.len() <= 2);
    assert!(answer.context[0].starts_with("Python is popular"));
    assert_eq!(
        answer.metadata[0],
        ChunkMetadata::new(path.to_string_lossy(), "paragraph_1")
    );
}

#[tokio::test]
async fn test_query_with_unsupported_file_fails() {
    let env = setup("unused", None).await;
    let path = env.docs().join("sheet.xlsx");
    std::fs::write(&path, b"PK").unwrap();
    let err = env.service.query("q", Some(&path)).await.unwrap_err();
    assert!(matches!(
        err,
        RagError::Pipeline(doc_rag::error::PipelineError::UnsupportedFormat(_))
    ));
}

#[tokio::test]
async fn test_query_file_outside_readable_dirs_is_rejected_and_not_indexed() {
    let env = setup("unused", None).await;
    let private = env.tmp.path().join("private");
    std::fs::create_dir_all(&private).unwrap();
    let secret = private.join("secret.txt");
    std::fs::write(&secret, "db_password=hunter2").unwrap();

    let err = env
        .service
        .query("anything", Some(&secret))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::PathNotAllowed(_)));

    let sneaky = env.docs().join("../private/secret.txt");
    let err = env
        .service
        .query("anything", Some(&sneaky))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::PathNotAllowed(_)));

    assert_eq!(env.service.pipeline().index().count().await.unwrap(), 0);
    assert_eq!(env.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_file_inside_allow_list_is_accepted() {
    let env = setup("Noted.", None).await;
    let workspace = env.tmp.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    let notes = workspace.join("notes.md");
    std::fs::write(&notes, "Mitochondria produce energy.").unwrap();

    let answer = env
        .service
        .query("What do mitochondria do?", Some(&notes))
        .await
        .unwrap();
    assert_eq!(answer.response, "Noted.");
    assert!(answer.context[0].contains("Mitochondria"));
}

#[tokio::test]
async fn test_automation_creates_file_inside_allow_list() {
    let env = setup("", None).await;
    let target = env.tmp.path().join("workspace/todo.txt");
    env.generator.set_reply(&format!(
        r#"{{"task": "create_file", "args": {{"file_path": "{}", "content": "buy milk"}}}}"#,
        target.display()
    ));

    let result = env
        .service
        .automate("Create a todo file containing buy milk")
        .await
        .unwrap();
    assert_eq!(result, "Success");
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "buy milk");
    assert!(env
        .generator
        .last_prompt()
        .contains("Request: Create a todo file containing buy milk"));

    let history = env.service.history(5).await.unwrap();
    assert_eq!(history[0].kind, history::KIND_AUTOMATION);
    assert_eq!(history[0].request, "Create a todo file containing buy milk");
    assert_eq!(history[0].response, "Success");
}

#[tokio::test]
async fn test_automation_outside_allow_list_fails() {
    let env = setup(r#"{"task":"delete_file","args":{"file_path":"/etc/hostname"}}"#, None).await;
    let result = env.service.automate("delete the hostname file").await.unwrap();
    assert_eq!(result, "Failed");
}

#[tokio::test]
async fn test_unrecognized_automation_reply() {
    let env = setup("I'm not sure what you mean.", None).await;
    let result = env.service.automate("do something").await.unwrap();
    assert_eq!(result, "Task not recognized");
    assert!(matches!(
        env.service.automate("  ").await.unwrap_err(),
        RagError::EmptyPrompt
    ));
}

// ─── HTTP ───────────────────────────────────────────────────────────

async fn spawn_server(service: RagService) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(Arc::new(service));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_endpoints() {
    let env = setup("Kubernetes schedules containers.", None).await;
    env.service.load_documents().await.unwrap();
    let docs = env.docs();
    let base = spawn_server(env.service).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = client
        .post(format!("{}/rag/query", base))
        .json(&serde_json::json!({"query": "what does kubernetes do?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "Kubernetes schedules containers.");
    let context = body["context"].as_array().unwrap();
    let metadata = body["metadata"].as_array().unwrap();
    assert_eq!(context.len(), metadata.len());
    assert!(metadata[0]["file"].as_str().unwrap().ends_with("ops.md"));
    assert!(metadata[0]["source"].is_string());

    let resp = client
        .post(format!("{}/rag/query", base))
        .json(&serde_json::json!({"query": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/rag/query", base))
        .json(&serde_json::json!({
            "query": "q",
            "file_path": docs.join("slides.pptx"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");

    let resp = client
        .post(format!("{}/rag/query", base))
        .json(&serde_json::json!({
            "query": "q",
            "file_path": docs.join("missing.txt"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let outside = docs.parent().unwrap().join("outside.txt");
    std::fs::write(&outside, "not for clients").unwrap();
    let resp = client
        .post(format!("{}/rag/query", base))
        .json(&serde_json::json!({"query": "q", "file_path": outside}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "forbidden");

    let resp = client
        .get(format!("{}/rag/history?limit=5", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["kind"], "query");
}

#[tokio::test]
async fn test_http_no_relevant_documents_is_404() {
    let env = setup("unused", None).await;
    let base = spawn_server(env.service).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/rag/query", base))
        .json(&serde_json::json!({"query": "anything"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "no relevant documents found");
}

#[tokio::test]
async fn test_http_automate() {
    let env = setup("not json at all", None).await;
    let base = spawn_server(env.service).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/rag/automate", base))
        .json(&serde_json::json!({"prompt": "tidy up"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "Task not recognized");

    let resp = client
        .post(format!("{}/rag/automate", base))
        .json(&serde_json::json!({"prompt": " "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
