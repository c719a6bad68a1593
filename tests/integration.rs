use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rag"))
}

/// Writes a config rooted in a temp dir. The embedding endpoint points at a
/// closed port with retries disabled so that nothing reaches the network.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/rag.sqlite"

[documents]
dir = "{root}/documents"

[cache]
dir = "{root}/cache"

[chunking]
chunk_size = 200
overlap = 20

[embedding]
provider = "ollama"
url = "http://127.0.0.1:9"
max_retries = 0
timeout_secs = 5

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("OLLAMA_HOST")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database_and_directories() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_rag(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));

    assert!(tmp.path().join("data/rag.sqlite").exists());
    assert!(tmp.path().join("documents").is_dir());
    assert!(tmp.path().join("cache").is_dir());
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok1) = run_rag(&config, &["init"]);
    let (_, stderr, ok2) = run_rag(&config, &["init"]);
    assert!(ok1);
    assert!(ok2, "second init failed: {}", stderr);
}

#[test]
fn test_load_empty_directory() {
    let (_tmp, config) = setup_test_env();
    run_rag(&config, &["init"]);
    let (stdout, stderr, ok) = run_rag(&config, &["load"]);
    assert!(ok, "load failed: {}", stderr);
    assert!(stdout.contains("Loaded 0 files"), "got: {}", stdout);
}

#[test]
fn test_load_counts_skipped_and_failed_files() {
    let (tmp, config) = setup_test_env();
    run_rag(&config, &["init"]);
    let docs = tmp.path().join("documents");
    fs::write(docs.join("notes.txt"), "Some notes about deployment.").unwrap();
    fs::write(docs.join("photo.jpg"), b"\xff\xd8\xff").unwrap();

    // The embedder is unreachable, so the text file fails; the batch still
    // completes and the unsupported file is skipped.
    let (stdout, stderr, ok) = run_rag(&config, &["load"]);
    assert!(ok, "load failed: {}", stderr);
    assert!(stdout.contains("1 skipped"), "got: {}", stdout);
    assert!(stdout.contains("1 failed"), "got: {}", stdout);
    assert!(stderr.contains("failed to process document"), "got: {}", stderr);
}

#[test]
fn test_ingest_rejects_unsupported_format() {
    let (tmp, config) = setup_test_env();
    run_rag(&config, &["init"]);
    let csv = tmp.path().join("table.csv");
    fs::write(&csv, "a,b,c").unwrap();

    let (_, stderr, ok) = run_rag(&config, &["ingest", csv.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("unsupported file format: .csv"), "got: {}", stderr);
}

#[test]
fn test_ingest_missing_file() {
    let (tmp, config) = setup_test_env();
    run_rag(&config, &["init"]);
    let missing = tmp.path().join("nope.md");

    let (_, stderr, ok) = run_rag(&config, &["ingest", missing.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("file not found"), "got: {}", stderr);
}

#[test]
fn test_history_starts_empty() {
    let (_tmp, config) = setup_test_env();
    run_rag(&config, &["init"]);
    let (stdout, stderr, ok) = run_rag(&config, &["history"]);
    assert!(ok, "history failed: {}", stderr);
    assert!(stdout.contains("No history."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_rag(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "got: {}", stderr);
}

#[test]
fn test_invalid_chunking_config_fails() {
    let (_tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("overlap = 20", "overlap = 500");
    fs::write(&config, content).unwrap();

    let (_, stderr, ok) = run_rag(&config, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("chunking.overlap"), "got: {}", stderr);
}
