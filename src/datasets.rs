//! Dataset lifecycle: listing, statistics, deletion and retention.
//!
//! Every document belongs to exactly one [`Dataset`]. Retention policies
//! (`[datasets.<name>]`) are enforced by [`prune_dataset`], which ingestion
//! also runs after each write.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::not_found;
use crate::get::format_ts_iso;
use crate::models::Dataset;

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub dataset: Dataset,
    pub documents: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub last_updated: Option<String>,
    pub max_documents: Option<i64>,
    pub retention_days: Option<i64>,
}

/// Summary row returned by [`list_documents`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub dataset: String,
    pub source_id: String,
    pub title: Option<String>,
    pub updated_at: String,
    pub chunk_count: i64,
}

/// One row per dataset, always all three, in [`Dataset::ALL`] order.
pub async fn dataset_stats(config: &Config) -> Result<Vec<DatasetStats>> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        r#"
        SELECT
            d.dataset,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT cv.chunk_id) AS embedded_count,
            MAX(d.updated_at) AS last_updated
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        GROUP BY d.dataset
        "#,
    )
    .fetch_all(&pool)
    .await?;
    pool.close().await;

    let stats = Dataset::ALL
        .iter()
        .map(|&dataset| {
            let policy = config.dataset_policy(dataset);
            let row = rows
                .iter()
                .find(|r| r.get::<String, _>("dataset") == dataset.as_str());
            DatasetStats {
                dataset,
                documents: row.map(|r| r.get("doc_count")).unwrap_or(0),
                chunks: row.map(|r| r.get("chunk_count")).unwrap_or(0),
                embedded_chunks: row.map(|r| r.get("embedded_count")).unwrap_or(0),
                last_updated: row
                    .and_then(|r| r.get::<Option<i64>, _>("last_updated"))
                    .map(format_ts_iso),
                max_documents: policy.max_documents,
                retention_days: policy.retention_days,
            }
        })
        .collect();

    Ok(stats)
}

/// Documents newest first, optionally restricted to one dataset.
pub async fn list_documents(
    config: &Config,
    dataset: Option<Dataset>,
    limit: i64,
    offset: i64,
) -> Result<Vec<DocumentSummary>> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        r#"
        SELECT d.id, d.dataset, d.source_id, d.title, d.updated_at,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count
        FROM documents d
        WHERE ?1 IS NULL OR d.dataset = ?1
        ORDER BY d.updated_at DESC, d.id ASC
        LIMIT ?2 OFFSET ?3
        "#,
    )
    .bind(dataset.map(|d| d.as_str()))
    .bind(limit.max(0))
    .bind(offset.max(0))
    .fetch_all(&pool)
    .await?;
    pool.close().await;

    Ok(rows
        .iter()
        .map(|row| DocumentSummary {
            id: row.get("id"),
            dataset: row.get("dataset"),
            source_id: row.get("source_id"),
            title: row.get("title"),
            updated_at: format_ts_iso(row.get("updated_at")),
            chunk_count: row.get("chunk_count"),
        })
        .collect())
}

pub async fn delete_document(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let removed = delete_ids(&pool, &[id.to_string()]).await;
    pool.close().await;

    if removed? == 0 {
        return Err(not_found(format!("document not found: {}", id)));
    }
    info!(document_id = id, "document deleted");
    Ok(())
}

/// Remove every document in `dataset`. Returns how many were removed.
pub async fn clear_dataset(config: &Config, dataset: Dataset) -> Result<u64> {
    let pool = db::connect(config).await?;
    let result = async {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM documents WHERE dataset = ?")
            .bind(dataset.as_str())
            .fetch_all(&pool)
            .await?;
        delete_ids(&pool, &ids).await
    }
    .await;
    pool.close().await;

    let removed = result?;
    info!(dataset = %dataset, removed, "dataset cleared");
    Ok(removed)
}

/// Apply `dataset`'s retention policy. Returns how many documents were removed.
pub async fn prune_dataset(config: &Config, dataset: Dataset) -> Result<u64> {
    let pool = db::connect(config).await?;
    let result = prune_with_pool(config, &pool, dataset).await;
    pool.close().await;
    result
}

pub(crate) async fn prune_with_pool(
    config: &Config,
    pool: &SqlitePool,
    dataset: Dataset,
) -> Result<u64> {
    let policy = config.dataset_policy(dataset);
    let mut removed = 0u64;

    if let Some(days) = policy.retention_days {
        let cutoff = days
            .checked_mul(86_400)
            .and_then(|secs| chrono::Utc::now().timestamp().checked_sub(secs))
            .unwrap_or(i64::MIN);
        let expired: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE dataset = ? AND updated_at < ?")
                .bind(dataset.as_str())
                .bind(cutoff)
                .fetch_all(pool)
                .await?;
        removed += delete_ids(pool, &expired).await?;
    }

    if let Some(max) = policy.max_documents {
        let overflow: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM documents
            WHERE dataset = ?
            ORDER BY updated_at DESC, created_at DESC, rowid DESC
            LIMIT -1 OFFSET ?
            "#,
        )
        .bind(dataset.as_str())
        .bind(max)
        .fetch_all(pool)
        .await?;
        removed += delete_ids(pool, &overflow).await?;
    }

    if removed > 0 {
        info!(dataset = %dataset, removed, "pruned documents");
    }
    Ok(removed)
}

/// Delete documents with all of their chunks, FTS rows and vectors.
async fn delete_ids(pool: &SqlitePool, ids: &[String]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut removed = 0u64;
    for id in ids {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        removed += sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;

    Ok(removed)
}

// ============ CLI ============

pub async fn run_stats(config: &Config) -> Result<()> {
    let stats = dataset_stats(config).await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("database: {} ({})", config.db.path.display(), format_bytes(db_size));
    println!();
    println!(
        "  {:<14} {:>6} {:>8} {:>10}   {}",
        "DATASET", "DOCS", "CHUNKS", "EMBEDDED", "LAST UPDATED"
    );
    println!("  {}", "-".repeat(62));
    for s in &stats {
        println!(
            "  {:<14} {:>6} {:>8} {:>10}   {}",
            s.dataset.as_str(),
            s.documents,
            s.chunks,
            s.embedded_chunks,
            s.last_updated.as_deref().unwrap_or("never")
        );
    }
    Ok(())
}

pub async fn run_list(
    config: &Config,
    dataset: Option<Dataset>,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let docs = list_documents(config, dataset, limit, offset).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in &docs {
        println!(
            "{}  {:<13} {}  {} ({} chunks)",
            doc.id,
            doc.dataset,
            doc.updated_at,
            doc.title.as_deref().unwrap_or(&doc.source_id),
            doc.chunk_count
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    delete_document(config, id).await?;
    println!("deleted: {}", id);
    Ok(())
}

pub async fn run_clear(config: &Config, dataset: Dataset) -> Result<()> {
    let removed = clear_dataset(config, dataset).await?;
    println!("cleared {}", dataset);
    println!("  documents removed: {}", removed);
    Ok(())
}

pub async fn run_prune(config: &Config, dataset: Option<Dataset>) -> Result<()> {
    let targets: Vec<Dataset> = match dataset {
        Some(d) => vec![d],
        None => Dataset::ALL.to_vec(),
    };
    for d in targets {
        let removed = prune_dataset(config, d).await?;
        println!("prune {}: {} removed", d, removed);
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
