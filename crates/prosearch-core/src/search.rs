//! Web search collaborator and the Tavily client behind it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ResearchError;
use crate::config::SearchConfig;
use crate::security::SecretValue;

/// Fixed number of results requested per query.
pub const MAX_RESULTS_PER_QUERY: usize = 5;

/// Tavily's relevance-optimised search mode, used for every query.
pub const SEARCH_DEPTH: &str = "advanced";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub search_depth: &'static str,
    pub max_results: usize,
    pub include_raw_content: bool,
}

impl SearchRequest {
    /// Relevance-optimised request used by every research task.
    pub fn advanced(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            search_depth: SEARCH_DEPTH,
            max_results: MAX_RESULTS_PER_QUERY,
            include_raw_content: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ResearchError>;
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Tavily search API client. Errors are surfaced as-is; nothing is retried.
pub struct TavilyClient {
    http: Client,
    base_url: String,
    api_key: SecretValue,
}

impl TavilyClient {
    pub fn new(config: &SearchConfig, api_key: SecretValue) -> Result<Self, ResearchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| {
                ResearchError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ResearchError> {
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await
            .map_err(|err| ResearchError::search(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ResearchError::search(format!("{status}: {detail}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|err| ResearchError::search(format!("malformed response: {err}")))?;

        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_request_matches_provider_contract() {
        let request = SearchRequest::advanced("rust async runtimes");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["query"], "rust async runtimes");
        assert_eq!(value["search_depth"], "advanced");
        assert_eq!(value["max_results"], 5);
        assert_eq!(value["include_raw_content"], true);
    }

    #[test]
    fn provider_results_tolerate_missing_raw_content() {
        let body = r#"{
            "query": "q",
            "results": [
                {"title": "T", "url": "https://example.com", "content": "C", "score": 0.9}
            ]
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].raw_content, None);
    }
}
