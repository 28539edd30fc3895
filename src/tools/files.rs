//! File tools: read, write, search and list.
//!
//! When `[files].root` is set every path is resolved against it and any
//! path that would land outside it is rejected. Without a root, paths are
//! used as given (relative to the server's working directory).

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use globset::GlobBuilder;
use regex::RegexBuilder;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use super::{allow_property, optional_str, required_str, Tool, ToolContext};
use crate::config::FilesConfig;
use crate::error::{bad_request, not_found};

/// Resolve a caller-supplied path under the configured sandbox root.
pub(crate) fn resolve_path(files: &FilesConfig, path: &str) -> Result<PathBuf> {
    let requested = Path::new(path);
    let Some(root) = &files.root else {
        return Ok(requested.to_path_buf());
    };

    let root = normalize(root);
    let candidate = if requested.is_absolute() {
        normalize(requested)
    } else {
        normalize(&root.join(requested))
    };
    if !candidate.starts_with(&root) {
        return Err(bad_request(format!(
            "path '{}' is outside the allowed root {}",
            path,
            root.display()
        )));
    }

    // Symlinks may still point elsewhere. The nearest existing ancestor is
    // what a write or create_dir_all will actually follow.
    if let Ok(real_root) = root.canonicalize() {
        let real = canonical_ancestor(&candidate)
            .with_context(|| format!("failed to resolve '{}'", path))?;
        if !real.starts_with(&real_root) {
            return Err(bad_request(format!(
                "path '{}' resolves outside the allowed root",
                path
            )));
        }
    }

    Ok(candidate)
}

/// Canonicalize the longest prefix of `path` that exists on disk.
fn canonical_ancestor(path: &Path) -> std::io::Result<PathBuf> {
    let mut current = path;
    loop {
        match current.canonicalize() {
            Ok(real) => return Ok(real),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match current.parent() {
                Some(parent) => current = parent,
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file as UTF-8 text (optionally a line range) or as base64"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "offset": { "type": "integer", "description": "First line to return (1-based)" },
                "limit": { "type": "integer", "description": "Number of lines to return" },
                "encoding": { "type": "string", "enum": ["utf8", "base64"], "default": "utf8" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let files = &ctx.config().files;
        let path = resolve_path(files, required_str(&params, "path")?)?;

        let meta = std::fs::metadata(&path)
            .map_err(|_| not_found(format!("file not found: {}", path.display())))?;
        if meta.is_dir() {
            return Err(bad_request(format!("{} is a directory", path.display())));
        }

        let mut bytes = Vec::new();
        std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .take(files.max_read_bytes)
            .read_to_end(&mut bytes)?;
        let truncated = meta.len() > files.max_read_bytes;
        let byte_count = bytes.len();

        if params["encoding"].as_str() == Some("base64") {
            return Ok(json!({
                "path": path.display().to_string(),
                "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
                "encoding": "base64",
                "bytes": byte_count,
                "truncated": truncated,
            }));
        }

        let text = decode_utf8(bytes, truncated)?;
        let total_lines = text.lines().count();
        let offset = params.get("offset").and_then(Value::as_u64);
        let limit = params.get("limit").and_then(Value::as_u64);
        let content = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(1).max(1) as usize - 1;
            let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);
            text.lines().skip(start).take(take).collect::<Vec<_>>().join("\n")
        } else {
            text
        };

        Ok(json!({
            "path": path.display().to_string(),
            "content": content,
            "encoding": "utf8",
            "bytes": byte_count,
            "truncated": truncated,
            "total_lines": total_lines,
        }))
    }
}

/// Decode UTF-8, dropping a multi-byte sequence cut off by truncation.
fn decode_utf8(bytes: Vec<u8>, truncated: bool) -> Result<String> {
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) if truncated && e.utf8_error().error_len().is_none() => {
            let valid = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            Ok(String::from_utf8(bytes)?)
        }
        Err(_) => Err(bad_request(
            "file is not valid UTF-8; read it with encoding=base64",
        )),
    }
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write or append UTF-8 text to a file"
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "append": { "type": "boolean", "default": false },
                "create_dirs": { "type": "boolean", "default": false },
                "allow": allow_property()
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = resolve_path(&ctx.config().files, required_str(&params, "path")?)?;
        let content = params["content"].as_str().unwrap_or_default();
        let append = params["append"].as_bool().unwrap_or(false);
        let create_dirs = params["create_dirs"].as_bool().unwrap_or(false);

        if path.is_dir() {
            return Err(bad_request(format!("{} is a directory", path.display())));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                if !create_dirs {
                    return Err(not_found(format!(
                        "parent directory does not exist: {} (pass create_dirs=true)",
                        parent.display()
                    )));
                }
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;
        file.write_all(content.as_bytes())?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
            "appended": append,
        }))
    }
}

#[derive(Debug, Serialize)]
struct SearchMatch {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lines: Option<Vec<usize>>,
}

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Find files by glob, optionally filtering by a content regex"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob matched against paths relative to root, e.g. **/*.rs" },
                "root": { "type": "string", "description": "Directory to search (default: files root or current directory)" },
                "contains": { "type": "string", "description": "Regex that file content must match" },
                "case_insensitive": { "type": "boolean", "default": false },
                "max_results": { "type": "integer" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let files = ctx.config().files.clone();
        let root = resolve_path(&files, optional_str(&params, "root").unwrap_or("."))?;
        if !root.is_dir() {
            return Err(not_found(format!("directory not found: {}", root.display())));
        }

        let case_insensitive = params["case_insensitive"].as_bool().unwrap_or(false);
        let pattern = required_str(&params, "pattern")?;
        let matcher = GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| bad_request(format!("invalid glob '{}': {}", pattern, e)))?
            .compile_matcher();
        let contains = optional_str(&params, "contains")
            .map(|re| {
                RegexBuilder::new(re)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| bad_request(format!("invalid regex '{}': {}", re, e)))
            })
            .transpose()?;
        let max_results = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(files.max_search_results)
            .max(1);

        let (matches, truncated) = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let walker = WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git");
            for entry in walker.filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                if !matcher.is_match(rel) {
                    continue;
                }

                let lines = match &contains {
                    None => None,
                    Some(re) => {
                        if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX)
                            > files.max_read_bytes
                        {
                            continue;
                        }
                        let Ok(text) = std::fs::read_to_string(entry.path()) else {
                            continue;
                        };
                        let hits: Vec<usize> = text
                            .lines()
                            .enumerate()
                            .filter(|(_, line)| re.is_match(line))
                            .map(|(i, _)| i + 1)
                            .collect();
                        if hits.is_empty() {
                            continue;
                        }
                        Some(hits)
                    }
                };

                if matches.len() == max_results {
                    return (matches, true);
                }
                matches.push(SearchMatch {
                    path: entry.path().display().to_string(),
                    lines,
                });
            }
            (matches, false)
        })
        .await?;

        Ok(json!({ "matches": matches, "truncated": truncated }))
    }
}

#[derive(Debug, Serialize)]
struct ListEntry {
    path: String,
    name: String,
    kind: &'static str,
    size: u64,
}

pub struct ListTool;

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List directory entries with kind and size"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "max_depth": { "type": "integer", "default": 1 }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let files = ctx.config().files.clone();
        let dir = resolve_path(&files, required_str(&params, "path")?)?;
        if !dir.is_dir() {
            return Err(not_found(format!("directory not found: {}", dir.display())));
        }
        let max_depth = params["max_depth"].as_u64().unwrap_or(1).max(1) as usize;
        let cap = files.max_search_results.max(1);

        let (entries, truncated) = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            let walker = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(max_depth)
                .sort_by_file_name();
            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                if entries.len() == cap {
                    return (entries, true);
                }
                let ft = entry.file_type();
                let kind = if ft.is_symlink() {
                    "symlink"
                } else if ft.is_dir() {
                    "dir"
                } else {
                    "file"
                };
                let size = if ft.is_file() {
                    entry.metadata().map(|m| m.len()).unwrap_or(0)
                } else {
                    0
                };
                let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
                entries.push(ListEntry {
                    path: rel.display().to_string(),
                    name: entry.file_name().to_string_lossy().to_string(),
                    kind,
                    size,
                });
            }
            (entries, false)
        })
        .await?;

        Ok(json!({ "entries": entries, "truncated": truncated }))
    }
}
