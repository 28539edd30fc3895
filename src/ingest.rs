//! Ingestion pipeline: item → dedup check → upsert → chunk → embed → prune.
//!
//! [`ingest_item`] handles one piece of content. [`ingest_path`] walks a
//! file or directory and feeds each matching file through the same path.
//! Inline embedding is non-fatal: chunks that fail to embed are reported as
//! `pending` and can be picked up later by `toolbox embed pending`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::datasets;
use crate::db;
use crate::embed_cmd;
use crate::error::{bad_request, not_found};
use crate::extract;
use crate::models::{Chunk, Dataset, IngestItem};

/// Include globs used when the caller passes none.
pub const DEFAULT_INCLUDE_GLOBS: [&str; 4] = ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"];

const ALWAYS_EXCLUDE: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Outcome of ingesting one item.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub dataset: Dataset,
    pub source_id: String,
    pub chunks: u64,
    pub embedded: u64,
    pub pending: u64,
    /// The stored document already had identical content; nothing was written.
    pub unchanged: bool,
    /// Documents removed by the dataset's retention policy afterwards.
    pub pruned: u64,
}

pub async fn ingest_item(config: &Config, item: IngestItem) -> Result<IngestReport> {
    let pool = db::connect(config).await?;
    let result = ingest_with_pool(config, &pool, item).await;
    let result = match result {
        Ok(mut report) => datasets::prune_with_pool(config, &pool, report.dataset)
            .await
            .map(|pruned| {
                report.pruned = pruned;
                report
            }),
        Err(e) => Err(e),
    };
    pool.close().await;
    result
}

/// Ingest a single file or every matching file under a directory.
///
/// `include_globs` are matched against paths relative to the directory;
/// an empty slice means [`DEFAULT_INCLUDE_GLOBS`]. A path given as a single
/// file is ingested regardless of globs.
pub async fn ingest_path(
    config: &Config,
    dataset: Dataset,
    path: &Path,
    include_globs: &[String],
) -> Result<Vec<IngestReport>> {
    if !path.exists() {
        return Err(not_found(format!("path not found: {}", path.display())));
    }
    let root = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve path: {}", path.display()))?;

    let files = if root.is_file() {
        vec![root.clone()]
    } else {
        collect_files(&root, include_globs)?
    };
    info!(dataset = %dataset, root = %root.display(), files = files.len(), "ingesting path");

    let pool = db::connect(config).await?;
    let mut reports = Vec::with_capacity(files.len());

    for file in &files {
        let item = match file_to_item(dataset, file) {
            Ok(item) => item,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "skipping file");
                continue;
            }
        };
        if item.body.trim().is_empty() {
            warn!(path = %file.display(), "skipping empty file");
            continue;
        }

        let mut report = match ingest_with_pool(config, &pool, item).await {
            Ok(r) => r,
            Err(e) => {
                pool.close().await;
                return Err(e.context(format!("Failed to ingest {}", file.display())));
            }
        };
        report.pruned = datasets::prune_with_pool(config, &pool, dataset).await?;
        reports.push(report);
    }

    pool.close().await;
    Ok(reports)
}

/// Ingest into an open pool without applying retention.
pub(crate) async fn ingest_with_pool(
    config: &Config,
    pool: &SqlitePool,
    item: IngestItem,
) -> Result<IngestReport> {
    if item.body.trim().is_empty() {
        return Err(bad_request("cannot ingest an empty body"));
    }

    let source_id = item
        .source_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let dedup_hash = dedup_hash(item.dataset, &source_id, &item.body);

    let existing: Option<(String, String)> = sqlx::query_as(
        "SELECT id, dedup_hash FROM documents WHERE dataset = ? AND source_id = ?",
    )
    .bind(item.dataset.as_str())
    .bind(&source_id)
    .fetch_optional(pool)
    .await?;

    if let Some((id, hash)) = &existing {
        if *hash == dedup_hash {
            let chunks: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                    .bind(id)
                    .fetch_one(pool)
                    .await?;
            debug!(document_id = %id, "content unchanged");
            return Ok(IngestReport {
                document_id: id.clone(),
                dataset: item.dataset,
                source_id,
                chunks: chunks as u64,
                embedded: 0,
                pending: 0,
                unchanged: true,
                pruned: 0,
            });
        }
    }

    let doc_id = existing
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let chunks = chunk_text(
        &doc_id,
        &item.body,
        config.chunking.max_tokens,
        config.chunking.overlap_tokens,
    );

    // The new dedup hash must never land without its chunks.
    let mut tx = pool.begin().await?;
    upsert_document(&mut *tx, &doc_id, &source_id, &item, &dedup_hash).await?;
    replace_chunks(&mut *tx, &doc_id, item.dataset, &chunks).await?;
    tx.commit().await?;

    let (embedded, pending) = embed_cmd::embed_chunks_inline(config, pool, &chunks).await;

    debug!(document_id = %doc_id, dataset = %item.dataset, chunks = chunks.len(), "document stored");
    Ok(IngestReport {
        document_id: doc_id,
        dataset: item.dataset,
        source_id,
        chunks: chunks.len() as u64,
        embedded,
        pending,
        unchanged: false,
        pruned: 0,
    })
}

fn dedup_hash(dataset: Dataset, source_id: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dataset.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn upsert_document(
    conn: &mut SqliteConnection,
    doc_id: &str,
    source_id: &str,
    item: &IngestItem,
    dedup_hash: &str,
) -> Result<()> {
    let now = Utc::now().timestamp();
    let metadata_json = serde_json::to_string(&item.metadata)?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, dataset, source_id, source_url, title, content_type, body, metadata_json, created_at, updated_at, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(dataset, source_id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            content_type = excluded.content_type,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            updated_at = excluded.updated_at,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(doc_id)
    .bind(item.dataset.as_str())
    .bind(source_id)
    .bind(&item.source_url)
    .bind(&item.title)
    .bind(&item.content_type)
    .bind(&item.body)
    .bind(&metadata_json)
    .bind(now)
    .bind(item.updated_at.timestamp())
    .bind(dedup_hash)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn replace_chunks(
    conn: &mut SqliteConnection,
    document_id: &str,
    dataset: Dataset,
    chunks: &[Chunk],
) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO chunks_fts (chunk_id, document_id, dataset, text) VALUES (?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(dataset.as_str())
        .bind(&chunk.text)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn collect_files(root: &Path, include_globs: &[String]) -> Result<Vec<PathBuf>> {
    let include_set = if include_globs.is_empty() {
        let defaults: Vec<String> = DEFAULT_INCLUDE_GLOBS.iter().map(|s| s.to_string()).collect();
        build_globset(&defaults)?
    } else {
        build_globset(include_globs)?
    };
    let excludes: Vec<String> = ALWAYS_EXCLUDE.iter().map(|s| s.to_string()).collect();
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn file_to_item(dataset: Dataset, path: &Path) -> Result<IngestItem> {
    let content_type = extract::content_type_for_path(path);
    let bytes = std::fs::read(path)?;
    let body = if extract::is_binary_type(content_type) {
        extract::extract_text(&bytes, content_type)?
    } else {
        String::from_utf8(bytes).context("file is not valid UTF-8")?
    };

    let modified: DateTime<Utc> = std::fs::metadata(path)?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(IngestItem {
        dataset,
        source_id: Some(path.to_string_lossy().to_string()),
        source_url: Some(format!("file://{}", path.display())),
        title: Some(title),
        content_type: content_type.to_string(),
        body,
        metadata: serde_json::json!({}),
        updated_at: modified,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).map_err(|e| bad_request(format!("invalid glob '{}': {}", pattern, e)))?,
        );
    }
    Ok(builder.build()?)
}

/// CLI entry point for `toolbox ingest`.
pub async fn run_ingest(
    config: &Config,
    dataset: Dataset,
    path: Option<&Path>,
    text: Option<String>,
    source_id: Option<String>,
    title: Option<String>,
    include_globs: &[String],
) -> Result<()> {
    let reports = match (path, text) {
        (_, Some(text)) => {
            let mut item = IngestItem::text(dataset, text);
            item.source_id = source_id;
            item.title = title;
            vec![ingest_item(config, item).await?]
        }
        (Some(path), None) => ingest_path(config, dataset, path, include_globs).await?,
        (None, None) => return Err(bad_request("ingest needs a <path> or --text")),
    };

    let written: Vec<&IngestReport> = reports.iter().filter(|r| !r.unchanged).collect();
    println!("ingest {}", dataset);
    println!("  items: {}", reports.len());
    println!("  written: {}", written.len());
    println!("  unchanged: {}", reports.len() - written.len());
    println!(
        "  chunks: {}",
        written.iter().map(|r| r.chunks).sum::<u64>()
    );
    if config.embedding.is_enabled() {
        println!(
            "  embeddings written: {}",
            written.iter().map(|r| r.embedded).sum::<u64>()
        );
        println!(
            "  embeddings pending: {}",
            written.iter().map(|r| r.pending).sum::<u64>()
        );
    }
    let pruned: u64 = reports.iter().map(|r| r.pruned).sum();
    if pruned > 0 {
        println!("  pruned: {}", pruned);
    }
    if let [single] = reports.as_slice() {
        println!("  document_id: {}", single.document_id);
    }
    println!("ok");
    Ok(())
}
