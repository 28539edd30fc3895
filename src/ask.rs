//! Retrieval-augmented answers.
//!
//! Retrieves the top `generation.context_chunks` documents for a question,
//! numbers them as `[n]` context blocks and asks the configured generation
//! backend to answer citing those numbers. Each block holds the text of the
//! document's best-matching chunk, within `generation.context_chars`.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::{bad_request, ToolError};
use crate::generation;
use crate::models::Dataset;
use crate::search::{search_documents, SearchMode, SearchResultItem};

const SYSTEM_PROMPT: &str = "You are a retrieval assistant. Answer the question using only the \
numbered context blocks. Cite blocks as [n]. If the context does not contain the answer, say so.";

#[derive(Debug, Clone, Serialize)]
pub struct AskSource {
    pub n: usize,
    pub id: String,
    pub title: Option<String>,
    pub dataset: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<AskSource>,
}

pub async fn ask(
    config: &Config,
    question: &str,
    dataset: Option<Dataset>,
    mode: Option<SearchMode>,
) -> Result<AskResponse> {
    if question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if !config.generation.is_enabled() {
        return Err(ToolError::GenerationDisabled.into());
    }

    let mode = mode.unwrap_or_else(|| SearchMode::default_for(config));
    let results = search_documents(
        config,
        question,
        mode,
        dataset,
        None,
        Some(config.generation.context_chunks.max(1)),
    )
    .await?;

    let pool = db::connect(config).await?;
    let texts = chunk_texts(&pool, &results).await;
    pool.close().await;
    let prompt = {
        let blocks: Vec<ContextBlock<'_>> = results
            .iter()
            .zip(texts?)
            .map(|(r, text)| ContextBlock {
                label: r.title.as_deref().unwrap_or(&r.source_id),
                text,
            })
            .collect();
        build_prompt(question, &blocks, config.generation.context_chars)
    };
    let answer = generation::generate(&config.generation, SYSTEM_PROMPT, &prompt).await?;

    let sources = results
        .into_iter()
        .enumerate()
        .map(|(i, r)| AskSource {
            n: i + 1,
            id: r.id,
            title: r.title,
            dataset: r.dataset,
            score: r.score,
        })
        .collect();

    Ok(AskResponse { answer, sources })
}

struct ContextBlock<'a> {
    label: &'a str,
    text: String,
}

/// Full text of each result's best chunk, falling back to the snippet.
async fn chunk_texts(pool: &SqlitePool, results: &[SearchResultItem]) -> Result<Vec<String>> {
    let mut texts = Vec::with_capacity(results.len());
    for r in results {
        let text: Option<String> = sqlx::query_scalar("SELECT text FROM chunks WHERE id = ?")
            .bind(&r.chunk_id)
            .fetch_optional(pool)
            .await?;
        texts.push(text.unwrap_or_else(|| r.snippet.replace(">>>", "").replace("<<<", "")));
    }
    Ok(texts)
}

fn build_prompt(question: &str, blocks: &[ContextBlock<'_>], budget: usize) -> String {
    let mut prompt = String::from("Context:\n");
    if blocks.is_empty() {
        prompt.push_str("(no relevant context was found in the knowledge base)\n");
    }
    let mut remaining = budget;
    for (i, block) in blocks.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let text = truncate_chars(block.text.trim(), remaining);
        remaining -= text.chars().count();
        prompt.push_str(&format!("\n[{}] {}\n{}\n", i + 1, block.label, text));
    }
    prompt.push_str(&format!("\nQuestion: {}\nAnswer:", question.trim()));
    prompt
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    dataset: Option<Dataset>,
    mode: Option<SearchMode>,
) -> Result<()> {
    let response = ask(config, question, dataset, mode).await?;

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for s in &response.sources {
            println!(
                "  [{}] {} ({}, {:.2}) {}",
                s.n,
                s.title.as_deref().unwrap_or("(untitled)"),
                s.dataset,
                s.score,
                s.id
            );
        }
    }
    Ok(())
}
