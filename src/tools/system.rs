//! System tools: program lookup, process listing, opening files and URLs,
//! running programs and killing processes.
//!
//! Programs are always started directly, never through a shell, so
//! arguments are passed verbatim.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{info, warn};

use super::files::resolve_path;
use super::{allow_property, optional_str, required_str, Tool, ToolContext};
use crate::error::{bad_request, not_found, ToolError};

/// Snapshot of all processes with memory and CPU figures populated.
fn process_snapshot() -> System {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::everything());
    // CPU usage is a delta between two refreshes.
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::everything());
    sys
}

/// sysinfo lists Linux threads next to processes; they share the owner's signals.
fn is_thread(process: &Process) -> bool {
    process.thread_kind().is_some()
}

/// Pids that belong to this process: its own pid and every thread id.
fn own_pids(sys: &System) -> Vec<u32> {
    let own = Pid::from_u32(std::process::id());
    let mut pids = vec![own.as_u32()];
    if let Some(tasks) = sys.process(own).and_then(Process::tasks) {
        pids.extend(tasks.iter().map(|t| t.as_u32()));
    }
    pids
}

/// Look up `program` on `PATH` the way a shell would.
fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    let extensions: Vec<String> = if cfg!(windows) {
        std::env::var("PATHEXT")
            .unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string())
            .split(';')
            .map(|e| e.to_string())
            .chain(std::iter::once(String::new()))
            .collect()
    } else {
        vec![String::new()]
    };

    std::env::split_paths(&paths).find_map(|dir| {
        extensions.iter().find_map(|ext| {
            let candidate = dir.join(format!("{}{}", program, ext));
            is_executable(&candidate).then_some(candidate)
        })
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub struct ExistsTool;

#[async_trait]
impl Tool for ExistsTool {
    fn name(&self) -> &str {
        "system_exists"
    }

    fn description(&self) -> &str {
        "Check whether a path exists or a program is available on PATH"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "description": "A file path or a program name" }
            },
            "required": ["target"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let target = required_str(&params, "target")?;
        let path = Path::new(target);

        if target.contains('/') || target.contains('\\') || path.exists() {
            return Ok(json!({
                "target": target,
                "kind": "path",
                "exists": path.exists(),
                "is_dir": path.is_dir(),
            }));
        }

        let found = find_on_path(target);
        Ok(json!({
            "target": target,
            "kind": "program",
            "exists": found.is_some(),
            "path": found.map(|p| p.display().to_string()),
        }))
    }
}

#[derive(Debug, Serialize)]
struct ProcessInfo {
    pid: u32,
    name: String,
    memory_bytes: u64,
    cpu_percent: f32,
}

pub struct ProcessesTool;

#[async_trait]
impl Tool for ProcessesTool {
    fn name(&self) -> &str {
        "system_processes"
    }

    fn description(&self) -> &str {
        "List running processes sorted by memory use"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Case-insensitive name substring filter" },
                "limit": { "type": "integer", "default": 50 }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let filter = optional_str(&params, "name").map(|s| s.to_lowercase());
        let limit = params["limit"].as_u64().unwrap_or(50) as usize;

        let (total, processes) = tokio::task::spawn_blocking(move || {
            let sys = process_snapshot();
            let mut list: Vec<ProcessInfo> = sys
                .processes()
                .iter()
                .filter(|(_, p)| !is_thread(p))
                .map(|(pid, p)| ProcessInfo {
                    pid: pid.as_u32(),
                    name: p.name().to_string_lossy().to_string(),
                    memory_bytes: p.memory(),
                    cpu_percent: p.cpu_usage(),
                })
                .filter(|p| {
                    filter
                        .as_ref()
                        .map_or(true, |f| p.name.to_lowercase().contains(f))
                })
                .collect();
            list.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes).then(a.pid.cmp(&b.pid)));
            let total = list.len();
            list.truncate(limit);
            (total, list)
        })
        .await?;

        Ok(json!({ "total": total, "processes": processes }))
    }
}

pub struct OpenTool;

#[async_trait]
impl Tool for OpenTool {
    fn name(&self) -> &str {
        "system_open"
    }

    fn description(&self) -> &str {
        "Open a file or URL with the desktop's default application"
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "description": "File path or URL" },
                "allow": allow_property()
            },
            "required": ["target"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let raw = required_str(&params, "target")?;
        let target = if raw.contains("://") || raw.starts_with("mailto:") {
            raw.to_string()
        } else {
            let path = resolve_path(&ctx.config().files, raw)?;
            if !path.exists() {
                return Err(not_found(format!("path not found: {}", path.display())));
            }
            path.display().to_string()
        };

        let (launcher, mut args): (&str, Vec<String>) = if cfg!(target_os = "macos") {
            ("open", vec![])
        } else if cfg!(windows) {
            ("cmd", vec!["/C".into(), "start".into(), String::new()])
        } else {
            ("xdg-open", vec![])
        };
        args.push(target.clone());

        tokio::process::Command::new(launcher)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => not_found(format!("launcher not found: {}", launcher)),
                _ => anyhow::anyhow!("failed to start {}: {}", launcher, e),
            })?;

        info!(target = %target, launcher, "opened");
        Ok(json!({ "opened": target, "launcher": launcher }))
    }
}

pub struct RunTool;

#[async_trait]
impl Tool for RunTool {
    fn name(&self) -> &str {
        "system_run"
    }

    fn description(&self) -> &str {
        "Run a program (no shell) and capture its exit code and output"
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Program name or path" },
                "args": { "type": "array", "items": { "type": "string" } },
                "cwd": { "type": "string" },
                "timeout_secs": { "type": "integer" },
                "allow": allow_property()
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let config = ctx.config();
        let command = required_str(&params, "command")?;
        let args: Vec<String> = params
            .get("args")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let timeout = Duration::from_secs(
            params
                .get("timeout_secs")
                .and_then(Value::as_u64)
                .unwrap_or(config.system.run_timeout_secs)
                .max(1),
        );

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = optional_str(&params, "cwd") {
            let dir = resolve_path(&config.files, cwd)?;
            if !dir.is_dir() {
                return Err(not_found(format!("cwd not found: {}", dir.display())));
            }
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => not_found(format!("program not found: {}", command)),
            _ => anyhow::anyhow!("failed to start {}: {}", command, e),
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command, ?timeout, "command timed out");
                return Err(ToolError::Timeout(format!(
                    "{} did not finish within {}s",
                    command,
                    timeout.as_secs()
                ))
                .into());
            }
        };

        let max = config.system.max_output_bytes;
        let (stdout, out_cut) = cap_output(&output.stdout, max);
        let (stderr, err_cut) = cap_output(&output.stderr, max);

        Ok(json!({
            "exit_code": output.status.code(),
            "success": output.status.success(),
            "stdout": stdout,
            "stderr": stderr,
            "truncated": out_cut || err_cut,
        }))
    }
}

/// Lossy UTF-8 decode capped at `max` bytes on a char boundary.
fn cap_output(bytes: &[u8], max: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return (text.into_owned(), false);
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[derive(Debug, Serialize)]
struct KilledProcess {
    pid: u32,
    name: String,
}

pub struct KillTool;

#[async_trait]
impl Tool for KillTool {
    fn name(&self) -> &str {
        "system_kill"
    }

    fn description(&self) -> &str {
        "Kill a process by pid, or every process with an exact name"
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pid": { "type": "integer" },
                "name": { "type": "string", "description": "Exact process name (case-insensitive)" },
                "allow": allow_property()
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let pid = params.get("pid").and_then(Value::as_u64);
        let name = optional_str(&params, "name").map(|s| s.to_lowercase());
        match (&pid, &name) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(bad_request("exactly one of pid or name is required"))
            }
            _ => {}
        }
        let pid = pid
            .map(|p| u32::try_from(p).map_err(|_| bad_request(format!("invalid pid: {}", p))))
            .transpose()?;

        let wanted = name.clone();
        let (killed, failed) = tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::everything(),
            );

            let own = own_pids(&sys);
            let mut killed = Vec::new();
            let mut failed = Vec::new();
            for (proc_pid, process) in sys.processes() {
                let raw = proc_pid.as_u32();
                if own.contains(&raw) || is_thread(process) {
                    continue;
                }
                let proc_name = process.name().to_string_lossy().to_string();
                let hit = match (pid, &wanted) {
                    (Some(p), _) => raw == p,
                    (None, Some(n)) => proc_name.to_lowercase() == *n,
                    (None, None) => false,
                };
                if !hit {
                    continue;
                }
                let entry = KilledProcess {
                    pid: raw,
                    name: proc_name,
                };
                if process.kill() {
                    killed.push(entry);
                } else {
                    failed.push(entry);
                }
            }
            (killed, failed)
        })
        .await?;

        if killed.is_empty() && failed.is_empty() {
            let what = match (pid, name) {
                (Some(p), _) => format!("pid {}", Pid::from_u32(p)),
                (_, Some(n)) => format!("name '{}'", n),
                _ => String::new(),
            };
            return Err(not_found(format!("no process matches {}", what)));
        }

        info!(killed = killed.len(), failed = failed.len(), "kill requested");
        Ok(json!({ "killed": killed, "failed": failed }))
    }
}
