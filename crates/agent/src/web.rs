//! Outbound web adapters: the search provider and the raw page fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use brainstorm_core::config::{ResearchConfig, SearchConfig};
use brainstorm_core::domain::research::SearchHit;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("search api key is not configured (set BRAINSTORM_SEARCH_API_KEY or TAVILY_API_KEY)")]
    MissingApiKey,
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("could not decode search response: {0}")]
    Decode(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetching {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("fetching {url} failed: {message}")]
    Transport { url: String, message: String },
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>, SearchError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// Tavily `/search` client.
#[derive(Clone)]
pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl TavilySearch {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        let base_url = base_url.into();
        Self {
            client: Client::new(),
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
            api_key,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.base_url.clone(), config.api_key.clone())
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>, SearchError> {
        let api_key = self.api_key.as_ref().ok_or(SearchError::MissingApiKey)?;
        let api_key = api_key.expose_secret();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&TavilyRequest { api_key, query, max_results })
            .send()
            .await
            .map_err(|err| SearchError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Status { status, message });
        }

        let parsed: TavilyResponse =
            response.json().await.map_err(|err| SearchError::Decode(err.to_string()))?;
        Ok(parsed.results)
    }
}

/// Plain GET of a page's markup with a browser-like user agent.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
    user_agent: String,
}

impl HttpPageFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self { client: Client::new(), user_agent: user_agent.into() }
    }

    pub fn from_config(config: &ResearchConfig) -> Self {
        Self::new(config.user_agent.clone())
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let timed_out =
            || FetchError::Timeout { url: url.to_string(), timeout_secs: timeout.as_secs() };
        let transport = |err: reqwest::Error| {
            if err.is_timeout() {
                timed_out()
            } else {
                FetchError::Transport { url: url.to_string(), message: err.to_string() }
            }
        };

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }

        response.text().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        FetchError, HttpPageFetcher, PageFetcher, SearchError, SearchProvider, TavilySearch,
    };

    #[tokio::test]
    async fn tavily_results_are_mapped_to_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({ "query": "rust async", "max_results": 5 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {
                        "url": "https://tokio.rs",
                        "title": "Tokio",
                        "content": "runtime",
                        "score": 0.9
                    },
                    { "url": "https://docs.rs", "title": "Docs" }
                ]
            })))
            .mount(&server)
            .await;

        let search = TavilySearch::new(server.uri(), Some("tvly-test".to_string().into()));
        let hits = search.search("rust async", 5).await.expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Tokio");
        assert_eq!(hits[1].content, "");
    }

    #[tokio::test]
    async fn search_without_key_fails_before_any_request() {
        let search = TavilySearch::new("http://127.0.0.1:9", None);

        assert_eq!(search.search("q", 5).await, Err(SearchError::MissingApiKey));
    }

    #[tokio::test]
    async fn fetcher_sends_user_agent_and_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("user-agent", "brainstorm-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<main>hello</main>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new("brainstorm-test");
        let page = fetcher.fetch(&format!("{}/ok", server.uri()), Duration::from_secs(5)).await;
        let missing =
            fetcher.fetch(&format!("{}/missing", server.uri()), Duration::from_secs(5)).await;

        assert_eq!(page.as_deref(), Ok("<main>hello</main>"));
        assert!(matches!(missing, Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn slow_pages_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new("brainstorm-test");
        let result =
            fetcher.fetch(&format!("{}/slow", server.uri()), Duration::from_millis(200)).await;

        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }
}
