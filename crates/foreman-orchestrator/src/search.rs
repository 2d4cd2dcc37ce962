//! Web search used to enrich subtask prompts.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SearchSettings;
use crate::error::{OrchestrationError, Result};
use crate::events::{RunEvent, TraceLog};

const TAVILY_BASE_URL: &str = "https://api.tavily.com";

/// Search failures.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request could not be sent or the connection failed.
    #[error("search request failed: {0}")]
    Request(String),
    /// The provider answered with an error status.
    #[error("search provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The response could not be understood.
    #[error("failed to parse search response: {0}")]
    Parse(String),
}

impl SearchError {
    /// Whether a second attempt might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { .. })
    }
}

/// A pluggable web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for logs and failure text.
    fn name(&self) -> &str;

    /// Answers `query` with plain text.
    async fn lookup(&self, query: &str) -> std::result::Result<String, SearchError>;
}

/// Tavily question-answering search.
pub struct TavilyProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TavilyProvider {
    /// Creates a provider with an explicit key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { client: Client::new(), api_key: api_key.into(), base_url: TAVILY_BASE_URL.to_string() }
    }

    /// Builds a provider from settings, reading `TAVILY_API_KEY` when no key is configured.
    pub fn from_settings(settings: &SearchSettings) -> Result<Self> {
        let api_key = match &settings.api_key {
            Some(key) => key.clone(),
            None => env::var("TAVILY_API_KEY").map_err(|_| {
                OrchestrationError::Config("TAVILY_API_KEY environment variable not set".to_string())
            })?,
        };

        let mut provider = Self::new(api_key);
        if let Some(base_url) = &settings.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        Ok(provider)
    }

    /// Overrides the endpoint base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "Tavily"
    }

    async fn lookup(&self, query: &str) -> std::result::Result<String, SearchError> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "advanced",
            "include_answer": true,
        });

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status { status: status.as_u16(), body });
        }

        let data: TavilyResponse =
            response.json().await.map_err(|e| SearchError::Parse(e.to_string()))?;

        // Prefer the synthesized answer; fall back to the raw result snippets.
        match data.answer.filter(|a| !a.trim().is_empty()) {
            Some(answer) => Ok(answer),
            None => Ok(data
                .results
                .iter()
                .map(|r| format!("{}\n{}", r.url, r.content))
                .collect::<Vec<_>>()
                .join("\n\n")),
        }
    }
}

/// Search with one retry and a text fallback; never fails.
#[derive(Clone)]
pub struct SearchAdapter {
    provider: Arc<dyn SearchProvider>,
    trace: TraceLog,
}

impl SearchAdapter {
    /// Wraps `provider`.
    pub fn new(provider: Arc<dyn SearchProvider>, trace: TraceLog) -> Self {
        Self { provider, trace }
    }

    /// Text substituted when the lookup fails.
    pub fn failure_text(&self) -> String {
        format!("Error querying {}", self.provider.name())
    }

    /// Looks up `query`, retrying a recoverable failure exactly once.
    pub async fn lookup(&self, query: &str) -> String {
        debug!(provider = %self.provider.name(), query = %query, "Searching");

        let mut result = self.provider.lookup(query).await;
        if let Err(err) = &result {
            if err.is_recoverable() {
                warn!(provider = %self.provider.name(), error = %err, "Search failed, retrying once");
                result = self.provider.lookup(query).await;
            }
        }

        match result {
            Ok(text) => {
                self.trace.emit(RunEvent::SearchQuery { query: query.to_string(), failed: false });
                text
            }
            Err(err) => {
                warn!(provider = %self.provider.name(), error = %err, "Search unavailable");
                self.trace.emit(RunEvent::SearchQuery { query: query.to_string(), failed: true });
                self.failure_text()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_for(server: &mockito::Server) -> (SearchAdapter, TraceLog) {
        let trace = TraceLog::new();
        let provider = TavilyProvider::new("tvly-test").with_base_url(server.url());
        (SearchAdapter::new(Arc::new(provider), trace.clone()), trace)
    }

    #[tokio::test]
    async fn test_lookup_returns_answer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "api_key": "tvly-test",
                "query": "latest rust edition"
            })))
            .with_status(200)
            .with_body(r#"{"answer": "Rust 2024", "results": []}"#)
            .create_async()
            .await;

        let (adapter, trace) = adapter_for(&server);
        assert_eq!(adapter.lookup("latest rust edition").await, "Rust 2024");
        mock.assert_async().await;
        assert_eq!(
            trace.events(),
            vec![RunEvent::SearchQuery { query: "latest rust edition".to_string(), failed: false }]
        );
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_results() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/search")
            .with_status(200)
            .with_body(r#"{"results": [{"url": "https://a", "content": "alpha"}]}"#)
            .create_async()
            .await;

        let (adapter, _) = adapter_for(&server);
        assert_eq!(adapter.lookup("q").await, "https://a\nalpha");
    }

    #[tokio::test]
    async fn test_failure_is_retried_once_then_replaced() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .with_status(502)
            .with_body("bad gateway")
            .expect(2)
            .create_async()
            .await;

        let (adapter, trace) = adapter_for(&server);
        assert_eq!(adapter.lookup("q").await, "Error querying Tavily");
        mock.assert_async().await;
        assert!(matches!(trace.events()[0], RunEvent::SearchQuery { failed: true, .. }));
    }

    #[test]
    fn test_from_settings_prefers_explicit_key() {
        let settings = SearchSettings {
            api_key: Some("explicit".to_string()),
            base_url: Some("http://localhost:1".to_string()),
            ..SearchSettings::default()
        };
        let provider = TavilyProvider::from_settings(&settings).unwrap();
        assert_eq!(provider.api_key, "explicit");
        assert_eq!(provider.base_url, "http://localhost:1");
    }
}
