//! RSS 2.0 (`<rss><channel><item>`). Parsed with feed-rs, so Atom documents
//! are accepted as well.

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;

use crate::article::{Article, Priority, DEFAULT_CATEGORY};
use crate::error::FeedError;
use crate::identity::{derive_article_id, relative_time_label};
use crate::parser::clean_summary;
use crate::source::FeedSource;

pub fn parse(raw: &[u8], source: &FeedSource, now: DateTime<Utc>) -> Result<Vec<Article>, FeedError> {
    let feed = parser::parse(raw).map_err(|e| FeedError::Format(e.to_string()))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| normalize(entry, source, now))
        .collect())
}

fn normalize(entry: Entry, source: &FeedSource, now: DateTime<Utc>) -> Article {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    let link = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    let description = entry
        .summary
        .map(|t| t.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();

    let published_at = entry
        .published
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now.timestamp());

    Article {
        id: derive_article_id(&source.name, &link, &title),
        summary: clean_summary(&description),
        category: DEFAULT_CATEGORY.to_string(),
        priority: Priority::Medium,
        source_name: source.name.clone(),
        relative_time_label: relative_time_label(published_at, now),
        published_at,
        title,
        link,
    }
}
