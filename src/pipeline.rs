use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{FetchError, ItemExtractionError, PageError};
use crate::fetcher::{FetchedPage, Fetcher};
use crate::parser::{self, ParsedPage};
use crate::record::Record;

/// Why the crawl stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last page had no "next" link.
    LastPage,
    /// `max_pages` reached while a next link was still pending.
    PageLimit,
    /// A next link pointed back at a page already visited.
    Cycle,
    /// A page could not be fetched or parsed.
    Aborted,
}

#[derive(Debug)]
pub struct SkippedItem {
    pub page: Url,
    pub error: ItemExtractionError,
}

#[derive(Debug)]
pub struct RunResult {
    pub records: Vec<Record>,
    pub pages_visited: usize,
    pub items_seen: usize,
    pub items_skipped: usize,
    pub pages_failed: usize,
    pub skipped: Vec<SkippedItem>,
    pub failure: Option<PageError>,
    pub stop: StopReason,
    pub started_at: DateTime<Utc>,
}

impl RunResult {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            pages_visited: 0,
            items_seen: 0,
            items_skipped: 0,
            pages_failed: 0,
            skipped: Vec::new(),
            failure: None,
            stop: StopReason::LastPage,
            started_at: Utc::now(),
        }
    }

    pub fn aborted(&self) -> bool {
        self.failure.is_some()
    }
}

enum State {
    Fetching(Url),
    Parsing(FetchedPage),
    Extracting { page: Url, parsed: ParsedPage },
    Done(StopReason),
}

/// Retry policy applied around each page fetch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Drives fetch → parse → extract over the pagination chain.
pub struct Pipeline {
    fetcher: Fetcher,
    retry: RetryPolicy,
    max_pages: usize,
}

impl Pipeline {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(settings)?,
            retry: RetryPolicy::from_settings(settings),
            max_pages: settings.max_pages,
        })
    }

    pub async fn run(&mut self, start: Url) -> RunResult {
        let mut result = RunResult::new();
        let mut visited: HashSet<Url> = HashSet::new();

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let mut state = State::Fetching(start);
        let stop = loop {
            state = match state {
                State::Fetching(url) => {
                    visited.insert(url.clone());
                    result.pages_visited += 1;
                    pb.set_message(format!(
                        "page {} · {} records · {}",
                        result.pages_visited,
                        result.records.len(),
                        url
                    ));
                    info!("Fetching page {}: {}", result.pages_visited, url);

                    match self.fetch_with_retry(&url).await {
                        // a redirect lands on a locator that needs guarding too
                        Ok(page) if page.url != url && !visited.insert(page.url.clone()) => {
                            warn!("{} redirected to already visited {}, stopping", url, page.url);
                            State::Done(StopReason::Cycle)
                        }
                        Ok(page) => State::Parsing(page),
                        Err(e) => {
                            warn!(page = %e.locator(), "Aborting run: {}", e);
                            result.pages_failed += 1;
                            result.failure = Some(e.into());
                            State::Done(StopReason::Aborted)
                        }
                    }
                }
                State::Parsing(fetched) => match parser::parse_page(&fetched.body, &fetched.url) {
                    Ok(parsed) => State::Extracting {
                        page: fetched.url,
                        parsed,
                    },
                    Err(e) => {
                        warn!("Page {} has unexpected structure, aborting run: {}", fetched.url, e);
                        result.pages_failed += 1;
                        result.failure = Some(e.into());
                        State::Done(StopReason::Aborted)
                    }
                },
                State::Extracting { page, parsed } => {
                    self.extract_items(&page, &parsed, &mut result);
                    self.next_state(parsed.next, &visited, result.pages_visited)
                }
                State::Done(reason) => break reason,
            };
        };

        pb.finish_and_clear();
        result.stop = stop;
        info!(
            "Crawl finished ({:?}): {} pages, {} records, {} skipped",
            stop,
            result.pages_visited,
            result.records.len(),
            result.items_skipped
        );
        result
    }

    fn extract_items(&self, page: &Url, parsed: &ParsedPage, result: &mut RunResult) {
        for block in &parsed.items {
            result.items_seen += 1;
            match parser::extract(block) {
                Ok(record) => result.records.push(record),
                Err(error) => {
                    warn!(
                        page = %page,
                        position = block.position,
                        field = %error.field(),
                        "Skipping item: {}",
                        error
                    );
                    result.items_skipped += 1;
                    result.skipped.push(SkippedItem {
                        page: page.clone(),
                        error,
                    });
                }
            }
        }
    }

    fn next_state(&self, next: Option<Url>, visited: &HashSet<Url>, pages: usize) -> State {
        match next {
            None => State::Done(StopReason::LastPage),
            Some(url) if visited.contains(&url) => {
                warn!("Next link {} was already visited, stopping", url);
                State::Done(StopReason::Cycle)
            }
            Some(url) if pages >= self.max_pages => {
                warn!(
                    "Page limit of {} reached, not following {}",
                    self.max_pages, url
                );
                State::Done(StopReason::PageLimit)
            }
            Some(url) => State::Fetching(url),
        }
    }

    async fn fetch_with_retry(&mut self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch(url).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "{} (attempt {}/{}), retrying in {:.1}s",
                        e,
                        attempt + 1,
                        self.retry.max_retries + 1,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
