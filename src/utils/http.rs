// src/utils/http.rs

//! HTTP client utilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Network seam used by the crawler and the enricher.
///
/// Implementations report non-success responses as [`AppError::Status`]
/// and connection-level failures as transport errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a page and decode it as text.
    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String>;

    /// Fetch a binary asset.
    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(config.crawler.page_timeout());
    if let Some(agent) = config.crawler.user_agents.first() {
        builder = builder.user_agent(agent);
    }
    Ok(builder.build()?)
}

/// `reqwest`-backed fetcher rotating through the configured user agents.
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
    encoding: String,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            user_agents: config
                .crawler
                .user_agents
                .iter()
                .filter(|ua| !ua.trim().is_empty())
                .cloned()
                .collect(),
            next_agent: AtomicUsize::new(0),
            encoding: config.site.encoding.clone(),
        })
    }

    fn next_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        Some(&self.user_agents[index])
    }

    async fn send(&self, url: &str, timeout: Duration) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(agent) = self.next_user_agent() {
            request = request.header(USER_AGENT, agent);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = self.send(url, timeout).await?;
        Ok(response.text_with_charset(&self.encoding).await?)
    }

    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let response = self.send(url, timeout).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agents_rotate() {
        let mut config = Config::default();
        config.crawler.user_agents = vec!["a".to_string(), " ".to_string(), "b".to_string()];
        let fetcher = HttpFetcher::new(&config).unwrap();

        assert_eq!(fetcher.next_user_agent(), Some("a"));
        assert_eq!(fetcher.next_user_agent(), Some("b"));
        assert_eq!(fetcher.next_user_agent(), Some("a"));
    }

    #[test]
    fn test_create_client_with_defaults() {
        assert!(create_async_client(&Config::default()).is_ok());
    }
}
