use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::FeedError;
use crate::source::FeedSource;

const USER_AGENT: &str = "F1News/1.0 (Feed Aggregator)";

/// Supplies the raw body of a source. One best-effort attempt per call.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<u8>, FeedError>;
}

pub struct HttpFeedClient {
    client: Client,
}

impl HttpFeedClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<u8>, FeedError> {
        let response = self
            .client
            .get(&source.endpoint)
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Network(format!(
                "HTTP error! status: {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
