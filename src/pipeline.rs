//! Fan-out fetch of all enabled sources, then merge, sort and dedup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::client::FeedClient;
use crate::error::{FeedError, PipelineError};
use crate::identity::normalize_title;
use crate::parser;
use crate::source::FeedSource;

/// Result of one source in one cycle.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source: String,
    pub result: Result<Vec<Article>, FeedError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct Aggregated {
    pub articles: Vec<Article>,
    pub failures: Vec<SourceFailure>,
}

pub async fn aggregate(
    client: Arc<dyn FeedClient>,
    sources: &[FeedSource],
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<Aggregated, PipelineError> {
    let outcomes = fetch_all(client, sources, timeout, now).await?;
    Ok(merge(outcomes))
}

/// Fetch and parse every enabled source concurrently. Waits for all of them
/// to settle and returns their outcomes in source-list order.
pub async fn fetch_all(
    client: Arc<dyn FeedClient>,
    sources: &[FeedSource],
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<SourceOutcome>, PipelineError> {
    let enabled: Vec<FeedSource> = sources.iter().filter(|s| s.enabled).cloned().collect();
    info!("Refreshing {} feeds", enabled.len());

    let mut tasks = JoinSet::new();
    for (index, source) in enabled.into_iter().enumerate() {
        let client = client.clone();
        tasks.spawn(async move {
            let result = fetch_source(client.as_ref(), &source, timeout, now).await;
            (
                index,
                SourceOutcome {
                    source: source.name,
                    result,
                },
            )
        });
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined?);
    }
    outcomes.sort_by_key(|(index, _)| *index);

    Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
}

async fn fetch_source(
    client: &dyn FeedClient,
    source: &FeedSource,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Article>, FeedError> {
    debug!("Fetching feed: {} ({})", source.name, source.endpoint);

    let raw = tokio::time::timeout(timeout, client.fetch(source))
        .await
        .map_err(|_| FeedError::Network(format!("timed out after {}s", timeout.as_secs())))??;

    parser::parse(&raw, source, now)
}

/// Concatenate in source order, sort newest first, drop title duplicates.
/// Failed sources contribute nothing but are reported.
pub fn merge(outcomes: Vec<SourceOutcome>) -> Aggregated {
    let mut articles = Vec::new();
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(items) => {
                debug!("Parsed {} articles from '{}'", items.len(), outcome.source);
                articles.extend(items);
            }
            Err(e) => {
                warn!("Failed to refresh feed '{}': {}", outcome.source, e);
                failures.push(SourceFailure {
                    source: outcome.source,
                    error: e.to_string(),
                });
            }
        }
    }

    // sort_by is stable: equal timestamps keep merge order
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    let articles = dedup_by_id(dedup_by_title(articles));

    info!(
        "Aggregated {} articles ({} sources failed)",
        articles.len(),
        failures.len()
    );

    Aggregated { articles, failures }
}

/// Keep the first article for each normalized title.
pub fn dedup_by_title(articles: Vec<Article>) -> Vec<Article> {
    let mut seen_titles = HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen_titles.insert(normalize_title(&a.title)))
        .collect()
}

/// Keep the first article for each id. Derived ids can collide even when
/// titles differ (`a.b` and `a-b` map to the same id).
pub fn dedup_by_id(articles: Vec<Article>) -> Vec<Article> {
    let mut seen_ids = HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen_ids.insert(a.id.clone()))
        .collect()
}
