//! The refresh session: owns the current article list, the seen set and the
//! source registry, and runs one aggregation cycle at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::article::Article;
use crate::client::FeedClient;
use crate::db::{Database, LatestArticles};
use crate::error::PipelineError;
use crate::identity::relative_time_label;
use crate::notify::Dispatcher;
use crate::pipeline::{self, SourceFailure};
use crate::seen::{compute_novelty, SeenSet};
use crate::source::{FeedSource, SourceRegistry};

const EVENT_CAPACITY: usize = 16;
const ALL_FEEDS_FAILED: &str = "all feeds failed to load";

/// Output of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub articles: Vec<Article>,
    /// Articles whose ids were not in the seen set when the cycle completed
    pub novel: Vec<Article>,
    pub failures: Vec<SourceFailure>,
}

#[derive(Debug, Clone)]
pub enum CycleEvent {
    Completed(Arc<AggregationResult>),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub articles: Vec<ArticleView>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failures: Vec<SourceFailure>,
}

/// Holds the in-flight flag for one cycle. Clearing it on drop keeps the
/// session usable when a cycle future is cancelled mid-flight.
struct RefreshGuard {
    refreshing: Arc<AtomicBool>,
}

impl RefreshGuard {
    fn acquire(refreshing: &Arc<AtomicBool>) -> Option<Self> {
        refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                refreshing: refreshing.clone(),
            })
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct SessionState {
    articles: Vec<Article>,
    novel_ids: HashSet<String>,
    seen: SeenSet,
    failures: Vec<SourceFailure>,
    last_updated: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct Aggregator {
    db: Arc<Database>,
    client: Arc<dyn FeedClient>,
    registry: RwLock<SourceRegistry>,
    state: Mutex<SessionState>,
    refreshing: Arc<AtomicBool>,
    events: broadcast::Sender<CycleEvent>,
    dispatcher: Option<Dispatcher>,
    timeout: Duration,
}

impl Aggregator {
    /// Build a session, restoring the seen set, feed toggles and the article
    /// list of the last completed cycle from storage.
    pub async fn load(
        db: Arc<Database>,
        client: Arc<dyn FeedClient>,
        mut registry: SourceRegistry,
        dispatcher: Option<Dispatcher>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let seen = db.load_seen().await?;
        let overrides = db.load_feed_overrides().await?;
        registry.apply_overrides(&overrides);
        info!("Loaded {} seen article ids", seen.len());

        let mut state = SessionState {
            seen,
            ..Default::default()
        };
        if let Some(latest) = db.load_latest_articles().await? {
            info!("Restored {} articles from the last refresh", latest.articles.len());
            let now = Utc::now();
            state.articles = latest
                .articles
                .into_iter()
                .map(|mut article| {
                    article.relative_time_label = relative_time_label(article.published_at, now);
                    article
                })
                .collect();
            state.last_updated = Some(latest.updated_at);
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            db,
            client,
            registry: RwLock::new(registry),
            state: Mutex::new(state),
            refreshing: Arc::new(AtomicBool::new(false)),
            events,
            dispatcher,
            timeout,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Subscribe to cycle completion / failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    /// Run one cycle. Returns `Ok(None)` without doing anything when another
    /// cycle is already in flight.
    pub async fn refresh(&self) -> Result<Option<Arc<AggregationResult>>, PipelineError> {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing) else {
            info!("Refresh already in progress, skipping");
            return Ok(None);
        };

        self.run_cycle().await.map(Some)
    }

    async fn run_cycle(&self) -> Result<Arc<AggregationResult>, PipelineError> {
        let sources = self.registry.read().await.enabled_sources();
        let now = Utc::now();

        let aggregated = match pipeline::aggregate(self.client.clone(), &sources, self.timeout, now).await {
            Ok(aggregated) => aggregated,
            Err(e) => {
                error!("Feed refresh failed: {}", e);
                let message = e.to_string();
                self.state.lock().await.last_error = Some(message.clone());
                let _ = self.events.send(CycleEvent::Failed(message));
                return Err(e);
            }
        };

        // Every enabled source failed: keep serving the last good list
        if !sources.is_empty() && aggregated.failures.len() == sources.len() {
            warn!("All {} feeds failed, keeping previous articles", sources.len());
            let mut state = self.state.lock().await;
            state.novel_ids.clear();
            state.failures = aggregated.failures.clone();
            state.last_error = Some(ALL_FEEDS_FAILED.to_string());

            let result = Arc::new(AggregationResult {
                articles: aggregated.articles,
                novel: Vec::new(),
                failures: aggregated.failures,
            });
            let _ = self.events.send(CycleEvent::Completed(result.clone()));
            return Ok(result);
        }

        let result = {
            let mut state = self.state.lock().await;
            let (novel, seen) = compute_novelty(&aggregated.articles, &state.seen);

            if let Err(e) = self.db.save_seen(&seen).await {
                error!("Failed to persist seen articles: {}", e);
            }
            let latest = LatestArticles {
                updated_at: now,
                articles: aggregated.articles.clone(),
            };
            if let Err(e) = self.db.save_latest_articles(&latest).await {
                error!("Failed to persist article list: {}", e);
            }

            state.novel_ids = novel.iter().map(|a| a.id.clone()).collect();
            state.articles = aggregated.articles.clone();
            state.failures = aggregated.failures.clone();
            state.seen = seen;
            state.last_updated = Some(now);
            state.last_error = None;

            Arc::new(AggregationResult {
                articles: aggregated.articles,
                novel,
                failures: aggregated.failures,
            })
        };

        info!(
            "Feed refresh complete: {} articles, {} new",
            result.articles.len(),
            result.novel.len()
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.notify(&result.novel);
        }

        let _ = self.events.send(CycleEvent::Completed(result.clone()));
        Ok(result)
    }

    /// Current articles for rendering, each flagged with whether it was new
    /// in the last cycle.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().await;
        Snapshot {
            articles: state
                .articles
                .iter()
                .map(|a| ArticleView {
                    is_new: state.novel_ids.contains(&a.id),
                    article: a.clone(),
                })
                .collect(),
            last_updated: state.last_updated,
            last_error: state.last_error.clone(),
            failures: state.failures.clone(),
        }
    }

    pub async fn seen(&self) -> SeenSet {
        self.state.lock().await.seen.clone()
    }

    pub async fn sources(&self) -> Vec<FeedSource> {
        self.registry.read().await.sources().to_vec()
    }

    /// Flip a source's enabled flag and persist the enable map. Returns the
    /// new value, or `None` when no source has that name.
    pub async fn toggle_source(&self, name: &str) -> anyhow::Result<Option<bool>> {
        // Held across the save so concurrent toggles persist in order
        let mut registry = self.registry.write().await;
        let Some(enabled) = registry.toggle(name) else {
            return Ok(None);
        };

        self.db.save_feed_overrides(&registry.enabled_map()).await?;
        info!("Feed '{}' {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(Some(enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::notify::{NotificationHost, NotificationRequest};
    use crate::source::FeedFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves one JSON envelope body per source name; the body can be swapped
    /// between cycles.
    struct EnvelopeClient {
        bodies: std::sync::Mutex<std::collections::HashMap<String, String>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl EnvelopeClient {
        fn new() -> Self {
            Self {
                bodies: Default::default(),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn set(&self, name: &str, body: String) {
            self.bodies.lock().unwrap().insert(name.to_string(), body);
        }
    }

    #[async_trait]
    impl FeedClient for EnvelopeClient {
        async fn fetch(&self, source: &FeedSource) -> Result<Vec<u8>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let body = self.bodies.lock().unwrap().get(&source.name).cloned();
            body.map(String::into_bytes)
                .ok_or_else(|| FeedError::Network("unreachable".to_string()))
        }
    }

    struct PanickingClient;

    #[async_trait]
    impl FeedClient for PanickingClient {
        async fn fetch(&self, _source: &FeedSource) -> Result<Vec<u8>, FeedError> {
            panic!("boom");
        }
    }

    #[derive(Default)]
    struct CountingHost {
        shown: std::sync::Mutex<Vec<NotificationRequest>>,
    }

    impl NotificationHost for CountingHost {
        fn show(&self, request: NotificationRequest) {
            self.shown.lock().unwrap().push(request);
        }
    }

    fn envelope(items: &[(&str, &str, i64)]) -> String {
        let articles: Vec<String> = items
            .iter()
            .map(|(id, title, pub_date)| {
                format!(
                    r#"{{"id": "{}", "title": "{}", "link": "https://example.com/{}", "pubDate": {}}}"#,
                    id, title, id, pub_date
                )
            })
            .collect();
        format!(r#"{{"success": true, "articles": [{}]}}"#, articles.join(","))
    }

    fn registry(names: &[&str]) -> SourceRegistry {
        let configs: Vec<_> = names
            .iter()
            .map(|name| crate::config::FeedConfig {
                name: name.to_string(),
                url: format!("https://{}.example.com/api", name.to_lowercase()),
                format: FeedFormat::JsonEnvelope,
                enabled: true,
            })
            .collect();
        SourceRegistry::from_config(&configs).unwrap()
    }

    async fn create_test_db() -> Arc<Database> {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        Arc::new(db)
    }

    async fn aggregator_with(
        db: Arc<Database>,
        client: Arc<dyn FeedClient>,
        names: &[&str],
        dispatcher: Option<Dispatcher>,
    ) -> Aggregator {
        Aggregator::load(db, client, registry(names), dispatcher, Duration::from_secs(10))
            .await
            .unwrap()
    }

    fn ids(articles: &[Article]) -> Vec<&str> {
        articles.iter().map(|a| a.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_first_cycle_everything_novel_second_nothing() {
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 30), ("a2", "Two", 20), ("a3", "Three", 10)]));
        let aggregator = aggregator_with(create_test_db().await, client, &["A"], None).await;

        let first = aggregator.refresh().await.unwrap().unwrap();
        assert_eq!(ids(&first.novel), vec!["a1", "a2", "a3"]);

        let second = aggregator.refresh().await.unwrap().unwrap();
        assert_eq!(ids(&second.articles), vec!["a1", "a2", "a3"]);
        assert!(second.novel.is_empty());
    }

    #[tokio::test]
    async fn test_only_new_ids_are_novel() {
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 10)]));
        let aggregator = aggregator_with(create_test_db().await, client.clone(), &["A"], None).await;
        aggregator.refresh().await.unwrap();

        client.set("A", envelope(&[("a2", "Two", 20), ("a1", "One", 10)]));
        let result = aggregator.refresh().await.unwrap().unwrap();

        assert_eq!(ids(&result.novel), vec!["a2"]);
        let snapshot = aggregator.snapshot().await;
        let flags: Vec<_> = snapshot.articles.iter().map(|v| (v.article.id.as_str(), v.is_new)).collect();
        assert_eq!(flags, vec![("a2", true), ("a1", false)]);
    }

    #[tokio::test]
    async fn test_seen_set_persisted_and_restored() {
        let db = create_test_db().await;
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 10), ("a2", "Two", 5)]));

        let aggregator = aggregator_with(db.clone(), client.clone(), &["A"], None).await;
        aggregator.refresh().await.unwrap();
        assert_eq!(db.load_seen().await.unwrap().len(), 2);

        let restarted = aggregator_with(db, client, &["A"], None).await;
        let result = restarted.refresh().await.unwrap().unwrap();
        assert!(result.novel.is_empty());
    }

    #[tokio::test]
    async fn test_last_articles_restored_when_sources_unreachable() {
        let db = create_test_db().await;
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 30), ("a2", "Two", 20)]));
        let aggregator = aggregator_with(db.clone(), client, &["A"], None).await;
        aggregator.refresh().await.unwrap();
        let updated = aggregator.snapshot().await.last_updated;

        // Restart with a transport that reaches nothing
        let restarted = aggregator_with(db, Arc::new(EnvelopeClient::new()), &["A"], None).await;

        let snapshot = restarted.snapshot().await;
        let restored: Vec<_> = snapshot.articles.iter().map(|v| v.article.id.as_str()).collect();
        assert_eq!(restored, vec!["a1", "a2"]);
        assert!(snapshot.articles.iter().all(|v| !v.is_new));
        assert_eq!(snapshot.last_updated, updated);
        assert_eq!(snapshot.articles[0].article.relative_time_label, "Jan 1, 1970");

        let result = restarted.refresh().await.unwrap().unwrap();
        assert!(result.articles.is_empty());
        assert_eq!(result.failures.len(), 1);

        let snapshot = restarted.snapshot().await;
        assert_eq!(snapshot.articles.len(), 2);
        assert_eq!(snapshot.last_updated, updated);
        assert!(snapshot.last_error.is_some());
        assert_eq!(snapshot.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_articles() {
        let db = create_test_db().await;
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 10)]));
        let aggregator = aggregator_with(db.clone(), client, &["A"], None).await;
        aggregator.refresh().await.unwrap();

        // Swap in a transport whose task panics, failing the join step
        let broken = Aggregator {
            client: Arc::new(PanickingClient),
            ..aggregator
        };
        let mut events = broken.subscribe();

        assert!(broken.refresh().await.is_err());

        let snapshot = broken.snapshot().await;
        assert_eq!(snapshot.articles.len(), 1);
        assert!(snapshot.last_error.is_some());
        assert!(matches!(events.recv().await.unwrap(), CycleEvent::Failed(_)));
        assert!(!broken.is_refreshing());
    }

    #[tokio::test]
    async fn test_source_failure_is_partial() {
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 10)]));
        let aggregator = aggregator_with(create_test_db().await, client, &["A", "B"], None).await;
        let mut events = aggregator.subscribe();

        let result = aggregator.refresh().await.unwrap().unwrap();

        assert_eq!(ids(&result.articles), vec!["a1"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].source, "B");
        assert!(aggregator.snapshot().await.last_error.is_none());
        match events.recv().await.unwrap() {
            CycleEvent::Completed(completed) => assert_eq!(completed.articles.len(), 1),
            CycleEvent::Failed(e) => panic!("unexpected failure event: {}", e),
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_skipped() {
        let client = Arc::new(EnvelopeClient {
            delay: Duration::from_millis(300),
            ..EnvelopeClient::new()
        });
        client.set("A", envelope(&[("a1", "One", 10)]));
        let aggregator = Arc::new(aggregator_with(create_test_db().await, client.clone(), &["A"], None).await);

        let background = aggregator.clone();
        let first = tokio::spawn(async move { background.refresh().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(aggregator.is_refreshing());
        assert!(aggregator.refresh().await.unwrap().is_none());

        let completed = first.await.unwrap().unwrap();
        assert!(completed.is_some());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(!aggregator.is_refreshing());
    }

    #[tokio::test]
    async fn test_cancelled_refresh_releases_guard() {
        let client = Arc::new(EnvelopeClient {
            delay: Duration::from_millis(300),
            ..EnvelopeClient::new()
        });
        client.set("A", envelope(&[("a1", "One", 10)]));
        let aggregator = Arc::new(aggregator_with(create_test_db().await, client.clone(), &["A"], None).await);

        let background = aggregator.clone();
        let cycle = tokio::spawn(async move { background.refresh().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(aggregator.is_refreshing());

        cycle.abort();
        assert!(cycle.await.unwrap_err().is_cancelled());
        assert!(!aggregator.is_refreshing());

        let result = aggregator.refresh().await.unwrap();
        assert_eq!(ids(&result.unwrap().articles), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_both_apply() {
        let db = create_test_db().await;
        let client = Arc::new(EnvelopeClient::new());
        let aggregator = aggregator_with(db.clone(), client, &["A", "B"], None).await;

        let (first, second) = tokio::join!(aggregator.toggle_source("B"), aggregator.toggle_source("B"));
        let mut results = vec![first.unwrap(), second.unwrap()];
        results.sort();
        assert_eq!(results, vec![Some(false), Some(true)]);

        let sources = aggregator.sources().await;
        assert!(sources.iter().find(|s| s.name == "B").unwrap().enabled);
        assert_eq!(db.load_feed_overrides().await.unwrap().get("B"), Some(&true));
    }

    #[tokio::test]
    async fn test_novel_articles_notified() {
        let host = Arc::new(CountingHost::default());
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 10), ("a2", "Two", 5)]));
        let aggregator = aggregator_with(
            create_test_db().await,
            client,
            &["A"],
            Some(Dispatcher::new(host.clone())),
        )
        .await;

        aggregator.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        aggregator.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let shown = host.shown.lock().unwrap();
        let tags: Vec<_> = shown.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_toggle_source_persists_and_applies() {
        let db = create_test_db().await;
        let client = Arc::new(EnvelopeClient::new());
        client.set("A", envelope(&[("a1", "One", 10)]));
        client.set("B", envelope(&[("b1", "Two", 20)]));
        let aggregator = aggregator_with(db.clone(), client.clone(), &["A", "B"], None).await;

        assert_eq!(aggregator.toggle_source("B").await.unwrap(), Some(false));
        assert_eq!(aggregator.toggle_source("Nope").await.unwrap(), None);

        let result = aggregator.refresh().await.unwrap().unwrap();
        assert_eq!(ids(&result.articles), vec!["a1"]);

        let restarted = aggregator_with(db, client, &["A", "B"], None).await;
        let sources = restarted.sources().await;
        assert!(!sources.iter().find(|s| s.name == "B").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_no_sources_empty_result() {
        let aggregator =
            aggregator_with(create_test_db().await, Arc::new(EnvelopeClient::new()), &[], None).await;

        let result = aggregator.refresh().await.unwrap().unwrap();
        assert!(result.articles.is_empty());
        assert!(aggregator.snapshot().await.last_updated.is_some());
    }
}
