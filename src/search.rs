//! Keyword, semantic and hybrid search over the RAG store.
//!
//! Each channel produces up to `candidate_k_*` chunk candidates. Scores are
//! min-max normalized per channel and blended as `(1-α)·k + α·v`, then
//! grouped per document with MAX aggregation. Results sort by score desc,
//! updated_at desc, id asc so equal-scoring documents order deterministically.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::{bad_request, ToolError};
use crate::get::format_ts_iso;
use crate::models::Dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    /// `hybrid` when embeddings are configured, otherwise `keyword`.
    pub fn default_for(config: &Config) -> Self {
        if config.embedding.is_enabled() {
            SearchMode::Hybrid
        } else {
            SearchMode::Keyword
        }
    }

    fn alpha(&self, hybrid_alpha: f64) -> f64 {
        match self {
            SearchMode::Keyword => 0.0,
            SearchMode::Semantic => 1.0,
            SearchMode::Hybrid => hybrid_alpha,
        }
    }

    fn uses_keyword(&self) -> bool {
        matches!(self, SearchMode::Keyword | SearchMode::Hybrid)
    }

    fn uses_vectors(&self) -> bool {
        matches!(self, SearchMode::Semantic | SearchMode::Hybrid)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        })
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(bad_request(format!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub dataset: String,
    pub title: Option<String>,
    pub source_id: String,
    pub source_url: Option<String>,
    pub updated_at: String,
    pub score: f64,
    pub snippet: String,
    /// The best-scoring chunk of the document.
    pub chunk_id: String,
}

/// Search documents. `limit` defaults to `retrieval.final_limit`.
pub async fn search_documents(
    config: &Config,
    query: &str,
    mode: SearchMode,
    dataset: Option<Dataset>,
    since: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<SearchResultItem>> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if mode.uses_vectors() && !config.embedding.is_enabled() {
        return Err(ToolError::EmbeddingsDisabled.into());
    }
    let since_ts = since.map(parse_since).transpose()?;
    let final_limit = limit.unwrap_or(config.retrieval.final_limit).max(1);

    let pool = db::connect(config).await?;
    let result = run_query(config, &pool, query, mode, dataset, since_ts, final_limit).await;
    pool.close().await;
    result
}

async fn run_query(
    config: &Config,
    pool: &SqlitePool,
    query: &str,
    mode: SearchMode,
    dataset: Option<Dataset>,
    since_ts: Option<i64>,
    final_limit: i64,
) -> Result<Vec<SearchResultItem>> {
    let keyword_candidates = if mode.uses_keyword() {
        fetch_keyword_candidates(pool, query, dataset, config.retrieval.candidate_k_keyword).await?
    } else {
        Vec::new()
    };

    let vector_candidates = if mode.uses_vectors() {
        fetch_vector_candidates(pool, config, query, dataset, config.retrieval.candidate_k_vector)
            .await?
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let doc_scores = merge_candidates(
        &keyword_candidates,
        &vector_candidates,
        mode.alpha(config.retrieval.hybrid_alpha),
    );

    let mut results: Vec<(i64, SearchResultItem)> = Vec::new();
    for (doc_id, hit) in doc_scores {
        let row = sqlx::query(
            "SELECT id, dataset, title, source_id, source_url, updated_at FROM documents WHERE id = ?",
        )
        .bind(&doc_id)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else { continue };
        let updated_at: i64 = row.get("updated_at");
        if since_ts.is_some_and(|ts| updated_at < ts) {
            continue;
        }

        results.push((
            updated_at,
            SearchResultItem {
                id: row.get("id"),
                dataset: row.get("dataset"),
                title: row.get("title"),
                source_id: row.get("source_id"),
                source_url: row.get("source_url"),
                updated_at: format_ts_iso(updated_at),
                score: hit.score,
                snippet: hit.snippet,
                chunk_id: hit.chunk_id,
            },
        ));
    }

    results.sort_by(|(ua, a), (ub, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ub.cmp(ua))
            .then(a.id.cmp(&b.id))
    });
    results.truncate(final_limit as usize);

    Ok(results.into_iter().map(|(_, item)| item).collect())
}

fn parse_since(since: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(since, "%Y-%m-%d")
        .map_err(|_| bad_request(format!("invalid since date '{}': use YYYY-MM-DD", since)))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default())
}

/// CLI entry point.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: SearchMode,
    dataset: Option<Dataset>,
    since: Option<&str>,
    limit: Option<i64>,
) -> Result<()> {
    let results = search_documents(config, query, mode, dataset, since, limit).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.dataset,
            result.title.as_deref().unwrap_or("(untitled)")
        );
        println!("    updated: {}", &result.updated_at[..10.min(result.updated_at.len())]);
        println!("    source_id: {}", result.source_id);
        if let Some(ref url) = result.source_url {
            println!("    url: {}", url);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

// ============ Candidate types ============

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    snippet: String,
}

#[derive(Debug, Clone)]
struct DocumentHit {
    score: f64,
    chunk_id: String,
    snippet: String,
}

/// Blend normalized channel scores per chunk and keep the best chunk per
/// document.
fn merge_candidates(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
) -> HashMap<String, DocumentHit> {
    let kw_map: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut all_chunks: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword.iter().chain(vector.iter()) {
        all_chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut doc_map: HashMap<String, DocumentHit> = HashMap::new();
    for (chunk_id, cand) in all_chunks {
        let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
        let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
        let hit = DocumentHit {
            score: (1.0 - alpha) * k + alpha * v,
            chunk_id: cand.chunk_id.clone(),
            snippet: cand.snippet.clone(),
        };

        match doc_map.get_mut(&cand.document_id) {
            Some(entry) if hit.score > entry.score => *entry = hit,
            Some(_) => {}
            None => {
                doc_map.insert(cand.document_id.clone(), hit);
            }
        }
    }
    doc_map
}

// ============ Keyword search ============

/// Rewrite free text into an FTS5 expression of quoted terms joined by OR,
/// so user punctuation never reaches the FTS parser.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    dataset: Option<Dataset>,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let Some(match_expr) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT chunk_id, document_id, rank,
               snippet(chunks_fts, 3, '>>>', '<<<', '...', 48) AS snippet
        FROM chunks_fts
        WHERE chunks_fts MATCH ?1
          AND (?2 IS NULL OR dataset = ?2)
        ORDER BY rank
        LIMIT ?3
        "#,
    )
    .bind(&match_expr)
    .bind(dataset.map(|d| d.as_str()))
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: -rank,
                snippet: row.get("snippet"),
            }
        })
        .collect())
}

// ============ Vector search ============

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    dataset: Option<Dataset>,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding,
               COALESCE(substr(c.text, 1, 240), '') AS snippet
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = cv.document_id
        WHERE ?1 IS NULL OR d.dataset = ?1
        "#,
    )
    .bind(dataset.map(|d| d.as_str()))
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                snippet: row.get("snippet"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k.max(0) as usize);

    Ok(candidates)
}

// ============ Score normalization ============

/// Min-max normalize scores to [0, 1]. A channel whose scores are all equal
/// normalizes to 1.0.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}
