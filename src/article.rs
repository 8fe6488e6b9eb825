use serde::{Deserialize, Serialize};

pub const DEFAULT_CATEGORY: &str = "News";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Case-insensitive; anything unrecognised is treated as medium.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

/// A normalized article, independent of the wire format it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub category: String,
    pub priority: Priority,
    pub source_name: String,
    /// Unix seconds, used for ordering
    pub published_at: i64,
    pub relative_time_label: String,
}
