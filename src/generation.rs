//! Text generation through a local LLM server.
//!
//! Two backends are supported:
//! - **ollama**: `POST /api/generate` (non-streaming)
//! - **lmstudio**: the OpenAI-compatible `POST /v1/chat/completions`
//!
//! Both share the retry policy in [`crate::embedding::post_json_with_retry`].

use anyhow::{bail, Result};
use tracing::debug;

use crate::config::GenerationConfig;
use crate::embedding::post_json_with_retry;
use crate::error::ToolError;

const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234";

/// Generate a completion for `prompt` under the `system` instruction.
pub async fn generate(config: &GenerationConfig, system: &str, prompt: &str) -> Result<String> {
    let model = match config.provider.as_str() {
        "disabled" => return Err(ToolError::GenerationDisabled.into()),
        _ => config
            .model
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("generation.model required"))?,
    };

    let answer = match config.provider.as_str() {
        "ollama" => {
            let base = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);
            let body = ollama_request_body(config, model, system, prompt);
            let json = post_json_with_retry(
                "Ollama",
                &format!("{}/api/generate", base.trim_end_matches('/')),
                &[],
                &body,
                config.timeout_secs,
                config.max_retries,
            )
            .await?;
            parse_ollama_response(&json)?
        }
        "lmstudio" => {
            let base = config.url.as_deref().unwrap_or(LMSTUDIO_BASE_URL);
            let body = lmstudio_request_body(config, model, system, prompt);
            let json = post_json_with_retry(
                "LM Studio",
                &format!("{}/v1/chat/completions", base.trim_end_matches('/')),
                &[],
                &body,
                config.timeout_secs,
                config.max_retries,
            )
            .await?;
            parse_chat_response(&json)?
        }
        other => bail!("Unknown generation provider: {}", other),
    };

    debug!(provider = %config.provider, model, chars = answer.len(), "generated answer");
    Ok(answer)
}

fn ollama_request_body(
    config: &GenerationConfig,
    model: &str,
    system: &str,
    prompt: &str,
) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "system": system,
        "prompt": prompt,
        "stream": false,
        "options": {
            "temperature": config.temperature,
            "num_predict": config.max_tokens,
        },
    })
}

fn lmstudio_request_body(
    config: &GenerationConfig,
    model: &str,
    system: &str,
    prompt: &str,
) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": prompt },
        ],
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": false,
    })
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            ToolError::Upstream("Invalid Ollama response: missing 'response'".into()).into()
        })
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            ToolError::Upstream("Invalid chat response: missing choices[0].message.content".into())
                .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama_config() -> GenerationConfig {
        GenerationConfig {
            provider: "ollama".into(),
            model: Some("llama3.1".into()),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_ollama_body_shape() {
        let body = ollama_request_body(&ollama_config(), "llama3.1", "be brief", "hello");
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 1024);
    }

    #[test]
    fn test_lmstudio_body_has_system_then_user() {
        let body = lmstudio_request_body(&ollama_config(), "m", "sys", "q");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "q");
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "response": "  forty-two \n", "done": true });
        assert_eq!(parse_ollama_response(&json).unwrap(), "forty-two");
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [ { "message": { "role": "assistant", "content": "hi" } } ]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "hi");
        let err = parse_chat_response(&serde_json::json!({ "choices": [] })).unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "upstream_error");
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let err = generate(&GenerationConfig::default(), "s", "p")
            .await
            .unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "generation_disabled");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_upstream_error() {
        let config = GenerationConfig {
            url: Some("http://127.0.0.1:1".into()),
            max_retries: 0,
            timeout_secs: 2,
            ..ollama_config()
        };
        let err = generate(&config, "s", "p").await.unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "upstream_error");
    }
}
