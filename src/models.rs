//! Core data models shared by the RAG store and the tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three fixed datasets the RAG store manages.
///
/// - `agent_core` holds durable reference knowledge.
/// - `context_flow` holds short-lived conversational context and is capped
///   by default.
/// - `agent_memory` holds facts the agent chose to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    AgentCore,
    ContextFlow,
    AgentMemory,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [
        Dataset::AgentCore,
        Dataset::ContextFlow,
        Dataset::AgentMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::AgentCore => "agent_core",
            Dataset::ContextFlow => "context_flow",
            Dataset::AgentMemory => "agent_memory",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "agent_core" => Ok(Dataset::AgentCore),
            "context_flow" => Ok(Dataset::ContextFlow),
            "agent_memory" => Ok(Dataset::AgentMemory),
            other => anyhow::bail!(
                "invalid dataset '{}': must be agent_core, context_flow, or agent_memory",
                other
            ),
        }
    }
}

/// A unit of content handed to the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub dataset: Dataset,
    /// Caller-chosen key, unique within the dataset. Re-ingesting the same
    /// key updates the existing document.
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl IngestItem {
    /// Plain-text item stamped with the current time.
    pub fn text(dataset: Dataset, body: impl Into<String>) -> Self {
        Self {
            dataset,
            source_id: None,
            source_url: None,
            title: None,
            content_type: "text/plain".to_string(),
            body: body.into(),
            metadata: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_roundtrip_names() {
        for ds in Dataset::ALL {
            assert_eq!(ds.as_str().parse::<Dataset>().unwrap(), ds);
            assert_eq!(ds.to_string(), ds.as_str());
        }
    }

    #[test]
    fn test_dataset_unknown_name() {
        let err = "scratch".parse::<Dataset>().unwrap_err().to_string();
        assert!(err.contains("agent_core"));
    }

    #[test]
    fn test_dataset_serde_snake_case() {
        let v = serde_json::to_value(Dataset::AgentMemory).unwrap();
        assert_eq!(v, serde_json::json!("agent_memory"));
        let ds: Dataset = serde_json::from_value(serde_json::json!("context_flow")).unwrap();
        assert_eq!(ds, Dataset::ContextFlow);
    }
}
