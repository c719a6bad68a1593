//! Natural-language file automation.
//!
//! A prompt such as "create /tmp/notes/todo.txt containing buy milk" is sent
//! to the generator together with [`instruction_prompt`], which asks for a
//! single JSON object of the form:
//!
//! ```json
//! {"task": "create_file", "args": {"file_path": "/tmp/notes/todo.txt", "content": "buy milk"}}
//! ```
//!
//! [`parse_task_instruction`] turns the reply into a [`FileTask`], and
//! [`FileManager::execute`] carries it out. Every path is checked against
//! the configured allow-list first; an empty list allows everything.
//!
//! Results are short strings meant for display: `"Success"`, `"Failed"`,
//! file contents for reads, or a search summary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Result string for a task that could not be understood.
pub const TASK_NOT_RECOGNIZED: &str = "Task not recognized";

/// A filesystem operation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum FileTask {
    CreateFile {
        file_path: PathBuf,
        #[serde(default)]
        content: String,
    },
    ReadFile {
        file_path: PathBuf,
    },
    UpdateFile {
        file_path: PathBuf,
        #[serde(default)]
        content: String,
    },
    DeleteFile {
        file_path: PathBuf,
    },
    CreateDirectory {
        dir_path: PathBuf,
    },
    MoveFile {
        src_path: PathBuf,
        dest_dir: PathBuf,
    },
    SearchFiles {
        dir_path: PathBuf,
        pattern: String,
    },
}

impl FileTask {
    pub fn name(&self) -> &'static str {
        match self {
            FileTask::CreateFile { .. } => "create_file",
            FileTask::ReadFile { .. } => "read_file",
            FileTask::UpdateFile { .. } => "update_file",
            FileTask::DeleteFile { .. } => "delete_file",
            FileTask::CreateDirectory { .. } => "create_directory",
            FileTask::MoveFile { .. } => "move_file",
            FileTask::SearchFiles { .. } => "search_files",
        }
    }
}

/// Prompt that asks the model to translate `request` into a task object.
pub fn instruction_prompt(request: &str) -> String {
    format!(
        r#"You translate file management requests into a single JSON object.
Respond with JSON only, no explanation, using exactly one of these forms:
{{"task": "create_file", "args": {{"file_path": "...", "content": "..."}}}}
{{"task": "read_file", "args": {{"file_path": "..."}}}}
{{"task": "update_file", "args": {{"file_path": "...", "content": "..."}}}}
{{"task": "delete_file", "args": {{"file_path": "..."}}}}
{{"task": "create_directory", "args": {{"dir_path": "..."}}}}
{{"task": "move_file", "args": {{"src_path": "...", "dest_dir": "..."}}}}
{{"task": "search_files", "args": {{"dir_path": "...", "pattern": "..."}}}}
Request: {}
JSON:"#,
        request
    )
}

/// Extracts the task object from a model reply.
///
/// The reply may wrap the JSON in prose or a code fence; the outermost
/// `{...}` span is parsed. Task names are matched case-insensitively.
pub fn parse_task_instruction(reply: &str) -> Result<FileTask> {
    let start = reply
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in model reply"))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("unterminated JSON object in model reply"))?;

    let mut value: serde_json::Value =
        serde_json::from_str(&reply[start..=end]).context("model reply is not valid JSON")?;
    if let Some(task) = value.get_mut("task") {
        if let Some(name) = task.as_str() {
            *task = serde_json::Value::String(name.trim().to_lowercase());
        }
    }
    serde_json::from_value(value).context("unrecognized task instruction")
}

/// Executes [`FileTask`]s inside an optional directory allow-list.
#[derive(Debug, Clone, Default)]
pub struct FileManager {
    allowed_dirs: Vec<PathBuf>,
}

impl FileManager {
    pub fn new(allowed_dirs: &[PathBuf]) -> Self {
        Self {
            allowed_dirs: allowed_dirs.iter().map(|d| absolute(d)).collect(),
        }
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    /// True when the list is empty or `path` lies under one of its entries.
    pub fn is_allowed(&self, path: &Path) -> bool {
        if self.allowed_dirs.is_empty() {
            return true;
        }
        let path = absolute(path);
        self.allowed_dirs.iter().any(|dir| path.starts_with(dir))
    }

    pub fn execute(&self, task: &FileTask) -> String {
        match task {
            FileTask::CreateFile { file_path, content } => {
                status(self.write_file(file_path, content, "created"))
            }
            FileTask::UpdateFile { file_path, content } => {
                status(self.write_file(file_path, content, "updated"))
            }
            FileTask::ReadFile { file_path } => self.read_file(file_path).unwrap_or_default(),
            FileTask::DeleteFile { file_path } => status(self.delete_file(file_path)),
            FileTask::CreateDirectory { dir_path } => status(self.create_directory(dir_path)),
            FileTask::MoveFile { src_path, dest_dir } => {
                status(self.move_file(src_path, dest_dir))
            }
            FileTask::SearchFiles { dir_path, pattern } => {
                match self.search_files(dir_path, pattern) {
                    Ok(found) if !found.is_empty() => {
                        let names: Vec<String> =
                            found.iter().map(|p| p.display().to_string()).collect();
                        format!("Found: {}", names.join(", "))
                    }
                    Ok(_) => "No files found".to_string(),
                    Err(e) => {
                        warn!(error = %e, "search_files failed");
                        "No files found".to_string()
                    }
                }
            }
        }
    }

    fn check(&self, path: &Path) -> Result<()> {
        if self.is_allowed(path) {
            Ok(())
        } else {
            Err(anyhow!("path not allowed: {}", path.display()))
        }
    }

    fn write_file(&self, path: &Path, content: &str, verb: &str) -> Result<()> {
        self.check(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!(path = %path.display(), "{} file", verb);
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        self.check(path)?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .inspect_err(|e| warn!(error = %e, "read_file failed"))?;
        info!(path = %path.display(), "read file");
        Ok(content)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        fs::remove_file(path)?;
        info!(path = %path.display(), "deleted file");
        Ok(())
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        fs::create_dir_all(path)?;
        info!(path = %path.display(), "created directory");
        Ok(())
    }

    fn move_file(&self, src: &Path, dest_dir: &Path) -> Result<()> {
        self.check(src)?;
        self.check(dest_dir)?;
        let name = src
            .file_name()
            .ok_or_else(|| anyhow!("source has no file name: {}", src.display()))?;
        if !src.is_file() {
            return Err(anyhow!("file not found: {}", src.display()));
        }
        fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(name);
        if fs::rename(src, &dest).is_err() {
            // rename fails across filesystems
            fs::copy(src, &dest)?;
            fs::remove_file(src)?;
        }
        info!(from = %src.display(), to = %dest.display(), "moved file");
        Ok(())
    }

    /// Entries directly inside `dir` whose name contains `pattern`.
    fn search_files(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        self.check(dir)?;
        let mut found: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(pattern))
            .map(|entry| entry.path())
            .collect();
        found.sort();
        info!(dir = %dir.display(), pattern, matches = found.len(), "searched files");
        Ok(found)
    }
}

fn status(result: Result<()>) -> String {
    match result {
        Ok(()) => "Success".to_string(),
        Err(e) => {
            warn!(error = %e, "file task failed");
            "Failed".to_string()
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
