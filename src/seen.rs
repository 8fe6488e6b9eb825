//! Tracking of article ids the user has already been shown.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::article::Article;

/// Ids observed in previous cycles. Grows monotonically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenSet(BTreeSet<String>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Split out the articles not yet in `seen` (input order kept) and return the
/// set extended with every article id, novel or not.
pub fn compute_novelty(articles: &[Article], seen: &SeenSet) -> (Vec<Article>, SeenSet) {
    let novel = articles
        .iter()
        .filter(|a| !seen.contains(&a.id))
        .cloned()
        .collect();

    let mut updated = seen.clone();
    for article in articles {
        updated.insert(article.id.clone());
    }

    (novel, updated)
}
