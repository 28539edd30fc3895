//! Integration tests for multi-format ingestion: DOCX text extraction,
//! content-type storage and skipping files that fail to extract.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn toolbox_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_toolbox"))
}

/// Minimal docx (ZIP) containing word/document.xml with one paragraph per phrase.
fn minimal_docx_with_text(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_file_support_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/toolbox.sqlite"

[chunking]
max_tokens = 700
"#,
        root.display()
    );
    let config_path = root.join("config").join("toolbox.toml");
    fs::write(&config_path, config_content).unwrap();

    fs::write(files_dir.join("readme.md"), "# Readme\n\nPlain text file for tests.\n").unwrap();

    (tmp, config_path, files_dir)
}

fn run_toolbox(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(toolbox_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run toolbox: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn file_support_docx_ingest_and_search() {
    let (_tmp, config_path, files_dir) = setup_file_support_env();
    fs::write(
        files_dir.join("handbook.docx"),
        minimal_docx_with_text(&["office test phrase", "second paragraph"]),
    )
    .unwrap();

    run_toolbox(&config_path, &["init"]);
    let dir = files_dir.to_string_lossy().to_string();
    let (stdout, stderr, success) = run_toolbox(&config_path, &["ingest", "agent_core", &dir]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("items: 2"), "got: {}", stdout);

    let (search_out, _, success) = run_toolbox(&config_path, &["search", "office test phrase"]);
    assert!(success, "search failed");
    assert!(search_out.contains("handbook.docx"), "got: {}", search_out);
}

#[test]
fn file_support_content_type_stored() {
    let (_tmp, config_path, files_dir) = setup_file_support_env();
    let docx = files_dir.join("handbook.docx");
    fs::write(&docx, minimal_docx_with_text(&["stored type check"])).unwrap();

    run_toolbox(&config_path, &["init"]);
    let (stdout, _, success) = run_toolbox(
        &config_path,
        &["ingest", "agent_core", &docx.to_string_lossy()],
    );
    assert!(success);
    let id = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("document_id:"))
        .map(|s| s.trim().to_string())
        .expect("document_id line");

    let (get_out, _, _) = run_toolbox(&config_path, &["get", &id]);
    assert!(
        get_out.contains("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "got: {}",
        get_out
    );
    assert!(get_out.contains("stored type check"));
}

#[test]
fn file_support_skipped_on_failure() {
    let (_tmp, config_path, files_dir) = setup_file_support_env();
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files_dir.join("bad.docx"), b"not a zip either").unwrap();
    fs::write(files_dir.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    run_toolbox(&config_path, &["init"]);
    let dir = files_dir.to_string_lossy().to_string();
    let (stdout, stderr, success) = run_toolbox(&config_path, &["ingest", "agent_core", &dir]);
    assert!(success, "ingest must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("items: 2"),
        "good.md and readme.md should be ingested: {}",
        stdout
    );
}

#[test]
fn file_support_single_bad_file_is_an_error_free_noop() {
    let (_tmp, config_path, files_dir) = setup_file_support_env();
    let bad = files_dir.join("bad.docx");
    fs::write(&bad, b"garbage").unwrap();

    run_toolbox(&config_path, &["init"]);
    let (stdout, _, success) =
        run_toolbox(&config_path, &["ingest", "agent_core", &bad.to_string_lossy()]);
    assert!(success);
    assert!(stdout.contains("items: 0"), "got: {}", stdout);
}
