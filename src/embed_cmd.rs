//! Embedding maintenance: backfill pending vectors and full rebuilds.
//!
//! A chunk is *pending* when it has no row in `embeddings` for the active
//! model, or when the stored hash no longer matches the chunk text.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::ToolError;
use crate::models::{Chunk, Dataset};

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedReport {
    pub total: u64,
    pub embedded: u64,
    pub failed: u64,
    pub dry_run: bool,
}

/// Find and embed chunks that are missing or have stale embeddings.
pub async fn embed_pending(
    config: &Config,
    dataset: Option<Dataset>,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<EmbedReport> {
    if !config.embedding.is_enabled() {
        return Err(ToolError::EmbeddingsDisabled.into());
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size).max(1);

    let pending = find_pending_chunks(&pool, provider.model_name(), dataset, limit).await?;

    let report = if dry_run {
        EmbedReport {
            total: pending.len() as u64,
            dry_run: true,
            ..EmbedReport::default()
        }
    } else {
        embed_batches(config, &pool, provider.as_ref(), &pending, batch_size).await?
    };

    pool.close().await;
    Ok(report)
}

/// Delete embeddings in scope and regenerate them.
pub async fn embed_rebuild(
    config: &Config,
    dataset: Option<Dataset>,
    batch_size_override: Option<usize>,
) -> Result<EmbedReport> {
    if !config.embedding.is_enabled() {
        return Err(ToolError::EmbeddingsDisabled.into());
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size).max(1);
    let scope = dataset.map(|d| d.as_str());

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        DELETE FROM chunk_vectors WHERE chunk_id IN (
            SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id
            WHERE ?1 IS NULL OR d.dataset = ?1
        )
        "#,
    )
    .bind(scope)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        r#"
        DELETE FROM embeddings WHERE chunk_id IN (
            SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id
            WHERE ?1 IS NULL OR d.dataset = ?1
        )
        "#,
    )
    .bind(scope)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(dataset = scope.unwrap_or("all"), "cleared embeddings");

    let all_chunks = find_pending_chunks(&pool, provider.model_name(), dataset, None).await?;
    let report = embed_batches(config, &pool, provider.as_ref(), &all_chunks, batch_size).await?;

    pool.close().await;
    Ok(report)
}

async fn embed_batches(
    config: &Config,
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    pending: &[PendingChunk],
    batch_size: usize,
) -> Result<EmbedReport> {
    let mut report = EmbedReport {
        total: pending.len() as u64,
        ..EmbedReport::default()
    };

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    upsert_embedding(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        provider.model_name(),
                        provider.dims(),
                        &item.hash,
                        &embedding::vec_to_blob(vec),
                    )
                    .await?;
                    report.embedded += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed");
                report.failed += batch.len() as u64;
            }
        }
    }

    Ok(report)
}

pub async fn run_embed_pending(
    config: &Config,
    dataset: Option<Dataset>,
    limit: Option<usize>,
    batch_size: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let report = embed_pending(config, dataset, limit, batch_size, dry_run).await?;

    if report.dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", report.total);
        return Ok(());
    }
    println!("embed pending");
    if report.total == 0 {
        println!("  all chunks up to date");
        return Ok(());
    }
    println!("  total pending: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

pub async fn run_embed_rebuild(
    config: &Config,
    dataset: Option<Dataset>,
    batch_size: Option<usize>,
) -> Result<()> {
    let report = embed_rebuild(config, dataset, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

/// Embed freshly written chunks during ingestion. Never fails; returns
/// `(embedded, pending)`.
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[Chunk],
) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "could not create embedding provider");
            return (0, chunks.len() as u64);
        }
    };

    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vec) in batch.iter().zip(vectors.iter()) {
                    if let Err(e) = upsert_embedding(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        provider.model_name(),
                        provider.dims(),
                        &chunk.hash,
                        &embedding::vec_to_blob(vec),
                    )
                    .await
                    {
                        warn!(chunk_id = %chunk.id, error = %e, "failed to store embedding");
                        pending += 1;
                    } else {
                        embedded += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "inline embedding failed; chunks left pending");
                pending += batch.len() as u64;
            }
        }
    }

    (embedded, pending)
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    hash: String,
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    dataset: Option<Dataset>,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(-1);

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?1
        WHERE (e.chunk_id IS NULL OR e.hash != c.hash)
          AND (?2 IS NULL OR d.dataset = ?2)
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?3
        "#,
    )
    .bind(model)
    .bind(dataset.map(|d| d.as_str()))
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect())
}

async fn upsert_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            created_at = excluded.created_at,
            hash = excluded.hash
        "#,
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(now)
    .bind(text_hash)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(blob)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
