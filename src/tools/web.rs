//! Web search over the DuckDuckGo HTML endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{required_str, Tool, ToolContext};
use crate::error::{bad_request, ToolError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return result titles, URLs and snippets"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer", "description": "Defaults to [web].max_results" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?.trim();
        if query.is_empty() {
            return Err(bad_request("query must not be empty"));
        }
        let web = &ctx.config().web;
        let max = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(web.max_results)
            .max(1);

        let client = reqwest::Client::builder()
            .user_agent(web.user_agent.as_str())
            .timeout(Duration::from_secs(web.timeout_secs))
            .build()?;
        let resp = client
            .get(&web.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("web search request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Upstream(format!("web search returned {}", status)).into());
        }
        let html = resp
            .text()
            .await
            .map_err(|e| ToolError::Upstream(format!("web search body: {}", e)))?;

        let results = parse_results(&html, max)?;
        debug!(query, count = results.len(), "web search");
        Ok(json!({ "query": query, "results": results }))
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {}", css, e))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract organic results from a DuckDuckGo HTML page.
pub fn parse_results(html: &str, max: usize) -> Result<Vec<WebResult>> {
    let doc = Html::parse_document(html);
    let result_sel = selector(".result")?;
    let link_sel = selector("a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut out = Vec::new();
    for result in doc.select(&result_sel) {
        if result.value().classes().any(|c| c == "result--ad") {
            continue;
        }
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let title = element_text(link);
        if title.is_empty() {
            continue;
        }
        out.push(WebResult {
            title,
            url: unwrap_redirect(href),
            snippet: result
                .select(&snippet_sel)
                .next()
                .map(element_text)
                .unwrap_or_default(),
        });
        if out.len() >= max {
            break;
        }
    }
    Ok(out)
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<url>`.
fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href.to_string()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}
