//! Local file-system module (`fs`).
//!
//! All paths are confined to a root directory. Blocking I/O runs on tokio's
//! blocking pool.

mod sandbox;

pub use sandbox::{Sandbox, SandboxError};

use crate::module::{Module, ModuleError};
use async_trait::async_trait;
use marco_intent::{ActionSchema, CapabilityDescriptor, ExecutionResult, ParamKind, Parameters};
use regex::Regex;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

pub const MODULE_NAME: &str = "fs";

/// Longest line excerpt returned by `find_pattern`.
const MAX_LINE_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct FsConfig {
    pub root: PathBuf,
    pub max_matches: usize,
    pub max_read_bytes: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_matches: 200,
            max_read_bytes: 64 * 1024,
        }
    }
}

pub struct FsModule {
    inner: Arc<Inner>,
}

struct Inner {
    sandbox: Sandbox,
    max_matches: usize,
    max_read_bytes: u64,
}

impl FsModule {
    /// Fails when the root does not exist.
    pub fn new(config: FsConfig) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                sandbox: Sandbox::new(&config.root)?,
                max_matches: config.max_matches,
                max_read_bytes: config.max_read_bytes,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        self.inner.sandbox.root()
    }

    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(MODULE_NAME, "Files and directories under the workspace root")
            .with_action(
                "list_dir",
                ActionSchema::read_only("List the entries of a directory").optional(
                    "path",
                    ParamKind::String,
                    "Directory to list (default \".\")",
                ),
            )
            .with_action(
                "find_pattern",
                ActionSchema::read_only("Search file contents for a regular expression")
                    .required("pattern", ParamKind::String, "Regular expression to search for")
                    .optional("path", ParamKind::String, "Directory to search (default \".\")"),
            )
            .with_action(
                "read_file",
                ActionSchema::read_only("Show the contents of a text file").required(
                    "path",
                    ParamKind::String,
                    "File to read",
                ),
            )
            .with_destructive_action(
                "delete_file",
                ActionSchema::write("Delete a single file").required(
                    "path",
                    ParamKind::String,
                    "File to delete",
                ),
            )
    }
}

#[async_trait]
impl Module for FsModule {
    fn capabilities(&self) -> CapabilityDescriptor {
        Self::descriptor()
    }

    async fn execute(
        &self,
        action: &str,
        parameters: &Parameters,
    ) -> Result<ExecutionResult, ModuleError> {
        let inner = Arc::clone(&self.inner);
        let action = action.to_string();
        let parameters = parameters.clone();
        debug!(module = MODULE_NAME, %action, "Executing");

        tokio::task::spawn_blocking(move || match action.as_str() {
            "list_dir" => inner.list_dir(&parameters),
            "find_pattern" => inner.find_pattern(&parameters),
            "read_file" => inner.read_file(&parameters),
            "delete_file" => inner.delete_file(&parameters),
            other => Err(ModuleError::Unsupported(other.to_string())),
        })
        .await
        .map_err(|e| ModuleError::Failed(format!("fs task failed: {}", e)))?
    }
}

impl Inner {
    fn list_dir(&self, params: &Parameters) -> Result<ExecutionResult, ModuleError> {
        let requested = str_param(params, "path").unwrap_or(".");
        let dir = self.resolve(requested)?;
        if !dir.is_dir() {
            return Err(ModuleError::Failed(format!("not a directory: {}", requested)));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let meta = entry.metadata().map_err(io_error)?;
            entries.push((
                entry.file_name().to_string_lossy().into_owned(),
                if meta.is_dir() { "dir" } else { "file" },
                meta.len(),
            ));
        }
        entries.sort();

        let shown = self.sandbox.display(&dir);
        let output: Vec<Value> = entries
            .iter()
            .map(|(name, kind, size)| json!({"name": name, "kind": kind, "size": size}))
            .collect();
        Ok(ExecutionResult::new(output)
            .with_fact("last_dir", shown.clone())
            .with_summary(format!("{} entries in {}", entries.len(), shown)))
    }

    fn find_pattern(&self, params: &Parameters) -> Result<ExecutionResult, ModuleError> {
        let pattern = str_param(params, "pattern")
            .ok_or_else(|| ModuleError::Failed("missing parameter: pattern".to_string()))?;
        let regex = Regex::new(pattern)
            .map_err(|e| ModuleError::Failed(format!("invalid pattern '{}': {}", pattern, e)))?;
        let base = self.resolve(str_param(params, "path").unwrap_or("."))?;

        let mut matches = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        'files: for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            // binary or unreadable files are skipped
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for (idx, line) in contents.lines().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if matches.len() >= self.max_matches {
                    truncated = true;
                    break 'files;
                }
                matches.push(json!({
                    "file": self.sandbox.display(entry.path()),
                    "line": idx + 1,
                    "text": line.trim().chars().take(MAX_LINE_CHARS).collect::<String>(),
                }));
            }
        }

        let summary = format!(
            "{}{} match(es) for /{}/",
            matches.len(),
            if truncated { "+" } else { "" },
            pattern
        );
        Ok(ExecutionResult::new(json!({"matches": matches, "truncated": truncated}))
            .with_fact("last_pattern", pattern)
            .with_summary(summary))
    }

    fn read_file(&self, params: &Parameters) -> Result<ExecutionResult, ModuleError> {
        let requested = str_param(params, "path")
            .ok_or_else(|| ModuleError::Failed("missing parameter: path".to_string()))?;
        let path = self.resolve(requested)?;
        if !path.is_file() {
            return Err(ModuleError::Failed(format!("not a file: {}", requested)));
        }

        let size = fs::metadata(&path).map_err(io_error)?.len();
        let mut bytes = Vec::new();
        fs::File::open(&path)
            .map_err(io_error)?
            .take(self.max_read_bytes)
            .read_to_end(&mut bytes)
            .map_err(io_error)?;
        let truncated = size > self.max_read_bytes;

        let shown = self.sandbox.display(&path);
        Ok(ExecutionResult::new(json!({
            "path": shown,
            "content": String::from_utf8_lossy(&bytes),
            "truncated": truncated,
        }))
        .with_fact("last_file", shown.clone())
        .with_summary(format!("{} ({} bytes)", shown, size)))
    }

    fn delete_file(&self, params: &Parameters) -> Result<ExecutionResult, ModuleError> {
        let requested = str_param(params, "path")
            .ok_or_else(|| ModuleError::Failed("missing parameter: path".to_string()))?;
        // A symlink is removed as a link; its target is left alone.
        let path = self
            .sandbox
            .resolve_entry(requested)
            .map_err(|e| ModuleError::Failed(e.to_string()))?;
        let meta = fs::symlink_metadata(&path).map_err(io_error)?;
        if meta.is_dir() {
            return Err(ModuleError::Failed(format!(
                "refusing to delete directory: {}",
                requested
            )));
        }
        fs::remove_file(&path).map_err(io_error)?;
        let shown = self.sandbox.display(&path);
        Ok(ExecutionResult::new(json!({"deleted": shown}))
            .with_summary(format!("deleted {}", shown)))
    }

    fn resolve(&self, requested: &str) -> Result<PathBuf, ModuleError> {
        self.sandbox
            .resolve(requested)
            .map_err(|e| ModuleError::Failed(e.to_string()))
    }
}

fn str_param<'a>(params: &'a Parameters, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

fn io_error(err: io::Error) -> ModuleError {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            ModuleError::Transient(err.to_string())
        }
        _ => ModuleError::Failed(err.to_string()),
    }
}
