use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::error;

use crate::article::Article;
use crate::seen::SeenSet;

pub const SEEN_ARTICLES_KEY: &str = "seen_articles";
pub const FEED_ENABLED_KEY: &str = "feed_enabled";
pub const AUTO_REFRESH_KEY: &str = "auto_refresh";
pub const LATEST_ARTICLES_KEY: &str = "latest_articles";

/// The article list of the last completed cycle, served until the next
/// cycle completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestArticles {
    pub updated_at: DateTime<Utc>,
    pub articles: Vec<Article>,
}

/// Persisted key-value entries (seen ids, last article list, feed toggles,
/// auto-refresh flag).
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database gets its own empty schema
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_value(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn set_value(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A corrupt stored value is logged and treated as an empty set.
    pub async fn load_seen(&self) -> anyhow::Result<SeenSet> {
        let Some(stored) = self.get_value(SEEN_ARTICLES_KEY).await? else {
            return Ok(SeenSet::new());
        };

        match serde_json::from_str(&stored) {
            Ok(seen) => Ok(seen),
            Err(e) => {
                error!("Error loading seen articles: {}", e);
                Ok(SeenSet::new())
            }
        }
    }

    pub async fn save_seen(&self, seen: &SeenSet) -> anyhow::Result<()> {
        let value = serde_json::to_string(seen)?;
        self.set_value(SEEN_ARTICLES_KEY, &value).await
    }

    pub async fn load_latest_articles(&self) -> anyhow::Result<Option<LatestArticles>> {
        let Some(stored) = self.get_value(LATEST_ARTICLES_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&stored) {
            Ok(latest) => Ok(Some(latest)),
            Err(e) => {
                error!("Error loading cached articles: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn save_latest_articles(&self, latest: &LatestArticles) -> anyhow::Result<()> {
        let value = serde_json::to_string(latest)?;
        self.set_value(LATEST_ARTICLES_KEY, &value).await
    }

    pub async fn load_feed_overrides(&self) -> anyhow::Result<BTreeMap<String, bool>> {
        let Some(stored) = self.get_value(FEED_ENABLED_KEY).await? else {
            return Ok(BTreeMap::new());
        };

        match serde_json::from_str(&stored) {
            Ok(map) => Ok(map),
            Err(e) => {
                error!("Error loading feed settings: {}", e);
                Ok(BTreeMap::new())
            }
        }
    }

    pub async fn save_feed_overrides(&self, overrides: &BTreeMap<String, bool>) -> anyhow::Result<()> {
        let value = serde_json::to_string(overrides)?;
        self.set_value(FEED_ENABLED_KEY, &value).await
    }

    /// `None` when the user never toggled auto refresh.
    pub async fn load_auto_refresh(&self) -> anyhow::Result<Option<bool>> {
        let stored = self.get_value(AUTO_REFRESH_KEY).await?;
        Ok(stored.map(|v| v == "true"))
    }

    pub async fn save_auto_refresh(&self, enabled: bool) -> anyhow::Result<()> {
        self.set_value(AUTO_REFRESH_KEY, if enabled { "true" } else { "false" })
            .await
    }
}
