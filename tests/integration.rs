use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn toolbox_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_toolbox"))
}

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/toolbox.sqlite"

[chunking]
max_tokens = 700

[retrieval]
final_limit = 12

[files]
root = "{}"

{}
"#,
        root.display(),
        root.display(),
        extra
    );

    let config_path = config_dir.join("toolbox.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("nested").join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();
    fs::write(files_dir.join("ignored.rs"), "fn main() {}").unwrap();

    let config_path = write_config(&root, "");
    (tmp, config_path)
}

fn run_toolbox(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = toolbox_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run toolbox binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .to_string_lossy()
        .to_string()
}

fn first_result_id(search_out: &str) -> Option<String> {
    search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_toolbox(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_toolbox(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_toolbox(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_toolbox(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Error"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_directory_uses_default_globs() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_toolbox(&config_path, &["ingest", "agent_core", &dir]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("items: 3"), "got: {}", stdout);
    assert!(stdout.contains("written: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);
    let (stdout, _, success) = run_toolbox(&config_path, &["ingest", "agent_core", &dir]);
    assert!(success);
    assert!(stdout.contains("written: 0"), "got: {}", stdout);
    assert!(stdout.contains("unchanged: 3"));
}

#[test]
fn test_ingest_with_include_glob() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    let (stdout, _, success) = run_toolbox(
        &config_path,
        &["ingest", "agent_core", &dir, "--include", "**/*.rs"],
    );
    assert!(success);
    assert!(stdout.contains("items: 1"), "got: {}", stdout);
}

#[test]
fn test_ingest_text_and_get() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);
    let (stdout, stderr, success) = run_toolbox(
        &config_path,
        &[
            "ingest",
            "agent_memory",
            "--text",
            "The user prefers tabs over spaces.",
            "--source-id",
            "pref-1",
            "--title",
            "Preferences",
        ],
    );
    assert!(success, "ingest failed: {}", stderr);
    let id = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("document_id:"))
        .map(|s| s.trim().to_string())
        .expect("document_id line");

    let (stdout, _, success) = run_toolbox(&config_path, &["get", &id]);
    assert!(success, "get should succeed");
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains("agent_memory"));
    assert!(stdout.contains("tabs over spaces"));
}

#[test]
fn test_ingest_missing_path_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);
    let (_, stderr, success) =
        run_toolbox(&config_path, &["ingest", "agent_core", "/definitely/not/here"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_ingest_unknown_dataset_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_toolbox(&config_path, &["ingest", "scratch", "--text", "hello"]);
    assert!(!success);
    assert!(stderr.contains("scratch"), "got: {}", stderr);
}

#[test]
fn test_search_keyword() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);

    let (stdout, _, success) = run_toolbox(&config_path, &["search", "Rust programming"]);
    assert!(success, "search failed");
    assert!(stdout.contains("alpha.md"), "Expected alpha.md in results, got: {}", stdout);
}

#[test]
fn test_search_dataset_filter() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);
    run_toolbox(
        &config_path,
        &["ingest", "context_flow", "--text", "Rust session notes from today"],
    );

    let (stdout, _, success) = run_toolbox(
        &config_path,
        &["search", "Rust", "--dataset", "context_flow"],
    );
    assert!(success);
    assert!(stdout.contains("context_flow"));
    assert!(!stdout.contains("agent_core"), "got: {}", stdout);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);

    let (stdout1, _, _) = run_toolbox(&config_path, &["search", "document"]);
    let (stdout2, _, _) = run_toolbox(&config_path, &["search", "document"]);
    assert_eq!(stdout1, stdout2, "Search results should be deterministic across runs");
}

#[test]
fn test_search_empty_query_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);
    let (_, stderr, success) = run_toolbox(&config_path, &["search", "  "]);
    assert!(!success);
    assert!(stderr.contains("must not be empty"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);

    let (stdout, _, success) = run_toolbox(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_semantic_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);
    for mode in ["semantic", "hybrid"] {
        let (_, stderr, success) =
            run_toolbox(&config_path, &["search", "anything", "--mode", mode]);
        assert!(!success, "{} search should fail without embeddings", mode);
        assert!(stderr.contains("embeddings are disabled"), "got: {}", stderr);
    }
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_toolbox(&config_path, &["search", "anything", "--mode", "fuzzy"]);
    assert!(!success);
    assert!(stderr.contains("fuzzy"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);

    let (_, stderr, success) = run_toolbox(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(stderr.contains("not found"), "Should report not found, got: {}", stderr);
}

#[test]
fn test_delete_and_list() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);

    let (list_out, _, success) = run_toolbox(&config_path, &["list", "--dataset", "agent_core"]);
    assert!(success);
    assert_eq!(list_out.lines().count(), 3, "got: {}", list_out);

    let (search_out, _, _) = run_toolbox(&config_path, &["search", "Rust"]);
    let id = first_result_id(&search_out).expect("a result id");

    let (stdout, _, success) = run_toolbox(&config_path, &["delete", &id]);
    assert!(success);
    assert!(stdout.contains(&id));

    let (list_out, _, _) = run_toolbox(&config_path, &["list"]);
    assert_eq!(list_out.lines().count(), 2);
    assert!(!list_out.contains(&id));

    let (_, stderr, success) = run_toolbox(&config_path, &["delete", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_datasets_stats_and_clear() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    run_toolbox(&config_path, &["init"]);
    run_toolbox(&config_path, &["ingest", "agent_core", &dir]);

    let (stdout, _, success) = run_toolbox(&config_path, &["datasets", "stats"]);
    assert!(success);
    assert!(stdout.contains("agent_core"));
    assert!(stdout.contains("context_flow"));
    assert!(stdout.contains("agent_memory"));

    let (stdout, _, success) = run_toolbox(&config_path, &["datasets", "clear", "agent_core"]);
    assert!(success);
    assert!(stdout.contains("documents removed: 3"));

    let (stdout, _, _) = run_toolbox(&config_path, &["list"]);
    assert!(stdout.contains("No documents"));
}

#[test]
fn test_datasets_prune_applies_max_documents() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "[datasets.agent_memory]\nmax_documents = 2\n");

    run_toolbox(&config_path, &["init"]);
    for i in 0..4 {
        let text = format!("memory note number {}", i);
        let (_, stderr, success) =
            run_toolbox(&config_path, &["ingest", "agent_memory", "--text", &text]);
        assert!(success, "{}", stderr);
    }

    let (stdout, _, _) = run_toolbox(&config_path, &["list", "--dataset", "agent_memory"]);
    assert_eq!(stdout.lines().count(), 2, "got: {}", stdout);

    let (stdout, _, success) = run_toolbox(&config_path, &["datasets", "prune"]);
    assert!(success);
    assert!(stdout.contains("prune agent_memory: 0 removed"));
}

#[test]
fn test_embed_commands_error_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);
    for action in ["pending", "rebuild"] {
        let (_, stderr, success) = run_toolbox(&config_path, &["embed", action]);
        assert!(!success, "embed {} should fail without embeddings", action);
        assert!(stderr.contains("embeddings are disabled"));
    }
}

#[test]
fn test_ask_errors_when_generation_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_toolbox(&config_path, &["init"]);
    let (_, stderr, success) = run_toolbox(&config_path, &["ask", "what is alpha?"]);
    assert!(!success);
    assert!(stderr.contains("generation is disabled"), "got: {}", stderr);
}

#[test]
fn test_tool_list() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_toolbox(&config_path, &["tool", "list"]);
    assert!(success);
    assert!(stdout.contains("rag_search"));
    assert!(stdout.contains("file_write [allow]"));
    assert!(stdout.contains("web_search"));
}

#[test]
fn test_tool_call_file_round_trip() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    let target = format!("{}/notes/todo.txt", dir);

    let (_, stderr, success) = run_toolbox(
        &config_path,
        &["tool", "call", "file_write", "--param", &format!("path={}", target), "--param", "content=buy milk"],
    );
    assert!(!success, "file_write without --allow must be refused");
    assert!(stderr.contains("allow"), "got: {}", stderr);

    let (stdout, stderr, success) = run_toolbox(
        &config_path,
        &[
            "tool",
            "call",
            "file_write",
            "--json",
            &format!(r#"{{"path": "{}", "content": "buy milk", "create_dirs": true}}"#, target),
            "--allow",
        ],
    );
    assert!(success, "file_write failed: {}", stderr);
    assert!(stdout.contains("bytes_written"));

    let (stdout, _, success) = run_toolbox(
        &config_path,
        &["tool", "call", "file_read", "--param", &format!("path={}", target)],
    );
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["content"], "buy milk");
}

#[test]
fn test_tool_call_outside_root_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_toolbox(
        &config_path,
        &["tool", "call", "file_read", "--param", "path=/etc/hostname"],
    );
    assert!(!success);
    assert!(stderr.contains("outside"), "got: {}", stderr);
}

#[test]
fn test_tool_call_unknown_tool() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_toolbox(&config_path, &["tool", "call", "nope"]);
    assert!(!success);
    assert!(stderr.contains("no tool registered"));
}
