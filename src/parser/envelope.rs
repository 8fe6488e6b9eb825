//! The JSON envelope: `{ success, message?, articles: [...] }`.
//!
//! Articles in the envelope are already close to the normalized shape; this
//! parser only fills the gaps (source stamp, defaults, dates).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::article::{Article, Priority, DEFAULT_CATEGORY};
use crate::error::FeedError;
use crate::identity::{checked_epoch, derive_article_id, parse_date, relative_time_label};
use crate::source::FeedSource;

const DEFAULT_FAILURE_MESSAGE: &str = "Failed to load feed";

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<EnvelopeArticle>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeArticle {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default, rename = "pubDate", alias = "published")]
    pub_date: Value,
}

pub fn parse(raw: &[u8], source: &FeedSource, now: DateTime<Utc>) -> Result<Vec<Article>, FeedError> {
    let envelope: Envelope =
        serde_json::from_slice(raw).map_err(|e| FeedError::Format(e.to_string()))?;

    if !envelope.success {
        let message = envelope
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        return Err(FeedError::Envelope(message));
    }

    Ok(envelope
        .articles
        .into_iter()
        .map(|item| normalize(item, source, now))
        .collect())
}

fn normalize(item: EnvelopeArticle, source: &FeedSource, now: DateTime<Utc>) -> Article {
    let title = item.title.unwrap_or_default().trim().to_string();
    let link = item.link.unwrap_or_default().trim().to_string();

    let id = match value_to_string(&item.id) {
        Some(id) => id,
        None => derive_article_id(&source.name, &link, &title),
    };

    let published_at = published_from_value(&item.pub_date).unwrap_or_else(|| now.timestamp());

    let relative_time_label = match item.timestamp {
        Some(label) if !label.trim().is_empty() => label.trim().to_string(),
        _ => relative_time_label(published_at, now),
    };

    Article {
        id,
        title,
        summary: item.summary.unwrap_or_default().trim().to_string(),
        link,
        category: item
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        priority: item
            .priority
            .as_deref()
            .map(Priority::parse)
            .unwrap_or_default(),
        source_name: item
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| source.name.clone()),
        published_at,
        relative_time_label,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn published_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .and_then(checked_epoch),
        Value::String(s) => parse_date(s),
        _ => None,
    }
}
