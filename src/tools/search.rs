//! Two-tier web search.
//!
//! The primary tier asks a search-capable model on the configured provider
//! to answer the query with current information. When that fails for any
//! reason the fallback tier queries a Tavily-style search API with the
//! stored search key pool. The fallback is silent: the model only ever
//! sees a result or an error, never which tier produced it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::api::{ChatMessage, MessageContent, ToolDefinition};
use crate::core::provider::{CompletionOutcome, CompletionProvider, CompletionRequest};
use crate::tools::{Tool, ToolError};

const FALLBACK_ENDPOINT: &str = "https://api.tavily.com/search";
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_MAX_RESULTS: u32 = 3;

pub struct WebSearch {
    provider: Arc<dyn CompletionProvider>,
    search_model: String,
    credential: Option<String>,
    search_api_keys: Vec<String>,
    client: reqwest::Client,
    fallback_endpoint: String,
}

#[derive(Deserialize)]
struct Arguments {
    query: String,
}

#[derive(Deserialize)]
struct FallbackResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<FallbackResult>,
}

#[derive(Deserialize)]
struct FallbackResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl WebSearch {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        search_model: String,
        credential: Option<String>,
        search_api_keys: Vec<String>,
    ) -> Self {
        WebSearch {
            provider,
            search_model,
            credential,
            search_api_keys,
            client: reqwest::Client::builder()
                .timeout(FALLBACK_TIMEOUT)
                .build()
                .unwrap_or_default(),
            fallback_endpoint: FALLBACK_ENDPOINT.to_string(),
        }
    }

    /// Primary tier: a single-shot call to the search-capable model.
    async fn primary(&self, query: &str) -> Result<String, ToolError> {
        let request = CompletionRequest {
            model: self.search_model.clone(),
            credential: self.credential.clone().unwrap_or_default(),
            messages: vec![ChatMessage::user(MessageContent::text(query))],
            temperature: 0.3,
            max_tokens: 1024,
            tools: None,
            json_only: false,
        };
        match self.provider.complete(&request).await {
            Ok(CompletionOutcome::Text(text)) => Ok(text),
            Ok(CompletionOutcome::ToolCalls { .. }) => Err(ToolError(
                "search model asked for tools instead of answering".to_string(),
            )),
            Err(err) => Err(ToolError(err.to_string())),
        }
    }

    /// Fallback tier: a direct search API call with the first stored key.
    async fn fallback(&self, query: &str) -> Result<String, ToolError> {
        let api_key = self
            .search_api_keys
            .first()
            .ok_or_else(|| ToolError("no search API key configured".to_string()))?;

        let payload = json!({
            "api_key": api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": FALLBACK_MAX_RESULTS,
            "include_answer": true,
        });

        let response = self
            .client
            .post(&self.fallback_endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ToolError(format!("search request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError(format!("search API returned HTTP {status}")));
        }

        let parsed: FallbackResponse = response
            .json()
            .await
            .map_err(|err| ToolError(format!("unparseable search response: {err}")))?;
        Ok(format_results(&parsed))
    }
}

fn format_results(response: &FallbackResponse) -> String {
    let mut lines = Vec::new();
    if let Some(answer) = response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        lines.push(format!("Summary: {answer}"));
    }
    for (index, result) in response.results.iter().enumerate() {
        lines.push(format!(
            "{}. [{}]({}): {}",
            index + 1,
            result.title,
            result.url,
            result.content
        ));
    }
    if lines.is_empty() {
        "No results found.".to_string()
    } else {
        lines.join("\n")
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "web_search",
            "Searches the web for current information and returns a short \
             summary with sources.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String, ToolError> {
        let args: Arguments = serde_json::from_str(arguments)
            .map_err(|err| ToolError(format!("invalid arguments: {err}")))?;

        match self.primary(&args.query).await {
            Ok(text) => Ok(text),
            Err(err) => {
                debug!("primary search tier failed, trying fallback: {err}");
                self.fallback(&args.query).await
            }
        }
    }
}
