//! RAG store tools: ingest, search, inspect and prune the three datasets.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use super::files::resolve_path;
use super::{
    allow_property, dataset_property, optional_dataset, optional_str, required_str, Tool,
    ToolContext,
};
use crate::ask::ask;
use crate::datasets::{clear_dataset, dataset_stats, delete_document, list_documents};
use crate::error::bad_request;
use crate::get::get_document;
use crate::ingest::{ingest_item, ingest_path};
use crate::models::IngestItem;
use crate::search::{search_documents, SearchMode};

fn mode_property() -> Value {
    json!({
        "type": "string",
        "enum": ["keyword", "semantic", "hybrid"],
        "description": "Retrieval mode; defaults to hybrid when embeddings are enabled, otherwise keyword"
    })
}

fn optional_mode(params: &Value) -> Result<Option<SearchMode>> {
    optional_str(params, "mode")
        .map(str::parse::<SearchMode>)
        .transpose()
}

pub struct IngestTool;

#[async_trait]
impl Tool for IngestTool {
    fn name(&self) -> &str {
        "rag_ingest"
    }

    fn description(&self) -> &str {
        "Store text in a dataset; re-using a source_id updates the existing document"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": dataset_property("Target dataset"),
                "text": { "type": "string", "description": "Content to store" },
                "source_id": { "type": "string", "description": "Stable key, unique within the dataset" },
                "title": { "type": "string" },
                "metadata": { "type": "object", "description": "Arbitrary JSON stored with the document" }
            },
            "required": ["dataset", "text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let dataset = optional_dataset(&params, "dataset")?
            .ok_or_else(|| bad_request("dataset must not be empty"))?;
        let text = required_str(&params, "text")?;

        let mut item = IngestItem::text(dataset, text);
        item.source_id = optional_str(&params, "source_id").map(String::from);
        item.title = optional_str(&params, "title").map(String::from);
        if let Some(metadata) = params.get("metadata").filter(|m| m.is_object()) {
            item.metadata = metadata.clone();
        }

        let report = ingest_item(ctx.config(), item).await?;
        Ok(serde_json::to_value(report)?)
    }
}

pub struct IngestPathTool;

#[async_trait]
impl Tool for IngestPathTool {
    fn name(&self) -> &str {
        "rag_ingest_path"
    }

    fn description(&self) -> &str {
        "Ingest a file or directory tree (markdown, text, PDF, DOCX) into a dataset; paths are confined to the files root"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": dataset_property("Target dataset"),
                "path": { "type": "string", "description": "File or directory to ingest" },
                "include_globs": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Globs relative to the directory (default: **/*.md, **/*.txt, **/*.pdf, **/*.docx)"
                }
            },
            "required": ["dataset", "path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let dataset = optional_dataset(&params, "dataset")?
            .ok_or_else(|| bad_request("dataset must not be empty"))?;
        let path = required_str(&params, "path")?;
        let globs: Vec<String> = params
            .get("include_globs")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let path = resolve_path(&ctx.config().files, path)?;
        let reports = ingest_path(ctx.config(), dataset, &path, &globs).await?;
        let written = reports.iter().filter(|r| !r.unchanged).count();
        Ok(json!({
            "files": reports.len(),
            "written": written,
            "reports": reports,
        }))
    }
}

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "rag_search"
    }

    fn description(&self) -> &str {
        "Search the knowledge base by keyword, embedding similarity, or both"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "dataset": dataset_property("Restrict results to one dataset"),
                "mode": mode_property(),
                "limit": { "type": "integer", "description": "Max results" },
                "since": { "type": "string", "description": "Only documents updated on or after this date (YYYY-MM-DD)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let mode = optional_mode(&params)?.unwrap_or_else(|| SearchMode::default_for(ctx.config()));
        let results = search_documents(
            ctx.config(),
            query,
            mode,
            optional_dataset(&params, "dataset")?,
            optional_str(&params, "since"),
            params.get("limit").and_then(Value::as_i64),
        )
        .await?;

        Ok(json!({ "mode": mode.to_string(), "results": results }))
    }
}

pub struct GetTool;

#[async_trait]
impl Tool for GetTool {
    fn name(&self) -> &str {
        "rag_get"
    }

    fn description(&self) -> &str {
        "Retrieve a document and its chunks by id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Document id" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let doc = get_document(ctx.config(), required_str(&params, "id")?).await?;
        Ok(serde_json::to_value(doc)?)
    }
}

pub struct ListTool;

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "rag_list"
    }

    fn description(&self) -> &str {
        "List stored documents, newest first"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": dataset_property("Restrict to one dataset"),
                "limit": { "type": "integer", "default": 50 },
                "offset": { "type": "integer", "default": 0 }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let docs = list_documents(
            ctx.config(),
            optional_dataset(&params, "dataset")?,
            params["limit"].as_i64().unwrap_or(50),
            params["offset"].as_i64().unwrap_or(0),
        )
        .await?;
        Ok(json!({ "documents": docs }))
    }
}

pub struct DatasetsTool;

#[async_trait]
impl Tool for DatasetsTool {
    fn name(&self) -> &str {
        "rag_datasets"
    }

    fn description(&self) -> &str {
        "Per-dataset document, chunk and embedding counts with retention settings"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let stats = dataset_stats(ctx.config()).await?;
        Ok(json!({ "datasets": stats }))
    }
}

pub struct AskTool;

#[async_trait]
impl Tool for AskTool {
    fn name(&self) -> &str {
        "rag_ask"
    }

    fn description(&self) -> &str {
        "Answer a question from retrieved context using the configured local LLM"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "dataset": dataset_property("Restrict context to one dataset"),
                "mode": mode_property()
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let response = ask(
            ctx.config(),
            required_str(&params, "question")?,
            optional_dataset(&params, "dataset")?,
            optional_mode(&params)?,
        )
        .await?;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct DeleteTool;

#[async_trait]
impl Tool for DeleteTool {
    fn name(&self) -> &str {
        "rag_delete"
    }

    fn description(&self) -> &str {
        "Delete one document with its chunks and vectors"
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Document id" },
                "allow": allow_property()
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        delete_document(ctx.config(), id).await?;
        Ok(json!({ "deleted": id }))
    }
}

pub struct ClearTool;

#[async_trait]
impl Tool for ClearTool {
    fn name(&self) -> &str {
        "rag_clear"
    }

    fn description(&self) -> &str {
        "Remove every document in a dataset"
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": dataset_property("Dataset to clear"),
                "allow": allow_property()
            },
            "required": ["dataset"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let dataset = optional_dataset(&params, "dataset")?
            .ok_or_else(|| bad_request("dataset must not be empty"))?;
        let removed = clear_dataset(ctx.config(), dataset).await?;
        Ok(json!({ "dataset": dataset, "removed": removed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ToolError;
    use crate::migrate::run_migrations;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, ToolRegistry, ToolContext) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("t.sqlite"));
        run_migrations(&config).await.unwrap();
        (tmp, ToolRegistry::with_builtins(), ToolContext::new(Arc::new(config)))
    }

    #[tokio::test]
    async fn test_ingest_search_get_roundtrip() {
        let (_tmp, registry, ctx) = setup().await;

        let report = registry
            .call(
                "rag_ingest",
                json!({
                    "dataset": "agent_memory",
                    "text": "The user's favourite editor is Helix.",
                    "source_id": "pref/editor",
                    "title": "Editor",
                    "metadata": { "origin": "chat" }
                }),
                &ctx,
            )
            .await
            .unwrap();
        let id = report["document_id"].as_str().unwrap().to_string();
        assert_eq!(report["dataset"], "agent_memory");

        let found = registry
            .call("rag_search", json!({ "query": "editor" }), &ctx)
            .await
            .unwrap();
        assert_eq!(found["mode"], "keyword");
        assert_eq!(found["results"][0]["id"], id.as_str());

        let doc = registry
            .call("rag_get", json!({ "id": id }), &ctx)
            .await
            .unwrap();
        assert_eq!(doc["metadata"]["origin"], "chat");
        assert_eq!(doc["chunks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_dataset_is_bad_request() {
        let (_tmp, registry, ctx) = setup().await;
        let err = registry
            .call("rag_ingest", json!({ "dataset": "scratch", "text": "x" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "bad_request");
    }

    #[tokio::test]
    async fn test_clear_is_gated() {
        let (_tmp, registry, ctx) = setup().await;
        registry
            .call("rag_ingest", json!({ "dataset": "context_flow", "text": "turn 1" }), &ctx)
            .await
            .unwrap();

        let err = registry
            .call("rag_clear", json!({ "dataset": "context_flow" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "permission_denied");

        let out = registry
            .call(
                "rag_clear",
                json!({ "dataset": "context_flow", "allow": true }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["removed"], 1);
    }

    #[tokio::test]
    async fn test_datasets_and_list() {
        let (_tmp, registry, ctx) = setup().await;
        registry
            .call("rag_ingest", json!({ "dataset": "agent_core", "text": "fact" }), &ctx)
            .await
            .unwrap();

        let stats = registry
            .call("rag_datasets", json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(stats["datasets"].as_array().unwrap().len(), 3);

        let listed = registry
            .call("rag_list", json!({ "dataset": "agent_core" }), &ctx)
            .await
            .unwrap();
        assert_eq!(listed["documents"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_path_respects_files_root() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_db_path(tmp.path().join("t.sqlite"));
        config.files.root = Some(tmp.path().join("sandbox"));
        run_migrations(&config).await.unwrap();
        std::fs::create_dir_all(tmp.path().join("sandbox")).unwrap();
        std::fs::write(tmp.path().join("sandbox/inside.md"), "inside the root").unwrap();
        std::fs::write(tmp.path().join("secret.md"), "outside the root").unwrap();
        let registry = ToolRegistry::with_builtins();
        let ctx = ToolContext::new(Arc::new(config));

        let absolute = tmp.path().join("secret.md");
        for path in ["../secret.md", absolute.to_str().unwrap()] {
            let err = registry
                .call("rag_ingest_path", json!({ "dataset": "agent_core", "path": path }), &ctx)
                .await
                .unwrap_err();
            assert_eq!(ToolError::classify(&err).1, "bad_request");
        }

        let out = registry
            .call("rag_ingest_path", json!({ "dataset": "agent_core", "path": "inside.md" }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["files"], 1);

        let listed = registry
            .call("rag_list", json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(listed["documents"].as_array().unwrap().len(), 1);
    }
}
