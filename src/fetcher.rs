use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::error::FetchError;

/// Raw markup of one page together with the locator it was finally served from.
#[derive(Debug)]
pub struct FetchedPage {
    pub url: Url,
    pub body: String,
}

/// Issues one GET per call, pausing `delay` before every request but the first.
/// Never retries on its own.
pub struct Fetcher {
    client: Client,
    delay: Duration,
    last_request: Option<Instant>,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            delay: settings.request_delay(),
            last_request: None,
        })
    }

    pub async fn fetch(&mut self, locator: &Url) -> Result<FetchedPage, FetchError> {
        if self.last_request.is_some() && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let start = Instant::now();
        self.last_request = Some(start);

        let response = self
            .client
            .get(locator.clone())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: locator.clone(),
                source,
            })?;

        let status = response.status();
        let url = response.url().clone();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        // Decode as UTF-8 whatever the server declares.
        let bytes = response.bytes().await.map_err(|source| FetchError::Body {
            url: url.clone(),
            source,
        })?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        debug!(
            "GET {} -> {} ({} bytes, {}ms)",
            url,
            status,
            body.len(),
            start.elapsed().as_millis()
        );
        Ok(FetchedPage { url, body })
    }
}
