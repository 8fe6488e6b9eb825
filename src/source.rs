//! Feed source registry.
//!
//! Sources are defined once from configuration. The only runtime mutation is
//! the per-source `enabled` flag, which the user can toggle and which is
//! persisted as a name → bool map.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Context};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::FeedConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    #[serde(alias = "json")]
    JsonEnvelope,
    #[default]
    Rss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSource {
    pub name: String,
    pub endpoint: String,
    pub format: FeedFormat,
    pub enabled: bool,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, format: FeedFormat) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            format,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<FeedSource>,
}

impl SourceRegistry {
    pub fn from_config(configs: &[FeedConfig]) -> anyhow::Result<Self> {
        let mut names = HashSet::new();
        let mut sources = Vec::with_capacity(configs.len());

        for config in configs {
            if !names.insert(config.name.as_str()) {
                bail!("duplicate feed name '{}'", config.name);
            }

            let url = Url::parse(&config.url)
                .with_context(|| format!("invalid url for feed '{}'", config.name))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!(
                    "unsupported url scheme '{}' for feed '{}'",
                    url.scheme(),
                    config.name
                );
            }

            sources.push(FeedSource {
                name: config.name.clone(),
                endpoint: config.url.clone(),
                format: config.format,
                enabled: config.enabled,
            });
        }

        Ok(Self { sources })
    }

    /// Apply persisted enable/disable overrides. Unknown names are ignored.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, bool>) {
        for source in &mut self.sources {
            if let Some(enabled) = overrides.get(&source.name) {
                source.enabled = *enabled;
            }
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn enabled_sources(&self) -> Vec<FeedSource> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Flip a source's enabled flag and return the new value. `None` when no
    /// source has the given name.
    pub fn toggle(&mut self, name: &str) -> Option<bool> {
        let source = self.sources.iter_mut().find(|s| s.name == name)?;
        source.enabled = !source.enabled;
        Some(source.enabled)
    }

    pub fn enabled_map(&self) -> BTreeMap<String, bool> {
        self.sources
            .iter()
            .map(|s| (s.name.clone(), s.enabled))
            .collect()
    }
}
