use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use f1_news::aggregator::Aggregator;
use f1_news::client::HttpFeedClient;
use f1_news::config::Config;
use f1_news::db::Database;
use f1_news::notify::{Dispatcher, LogNotificationHost};
use f1_news::routes::{self, AppState};
use f1_news::scheduler::AutoRefresh;
use f1_news::source::SourceRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "f1_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load("feeds.toml")?;
    let registry = SourceRegistry::from_config(&config.feeds)?;
    info!("Loaded {} feeds from configuration", config.feeds.len());

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:f1_news.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    let timeout = Duration::from_secs(config.request_timeout);
    let client = Arc::new(HttpFeedClient::new(timeout)?);
    let dispatcher = config
        .notifications
        .then(|| Dispatcher::new(Arc::new(LogNotificationHost)));

    let aggregator = Arc::new(Aggregator::load(db.clone(), client, registry, dispatcher, timeout).await?);

    // Initial load
    let initial = aggregator.clone();
    tokio::spawn(async move {
        if let Err(e) = initial.refresh().await {
            error!("Initial feed refresh failed: {}", e);
        }
    });

    // Start auto refresh
    let auto_refresh = Arc::new(
        AutoRefresh::load(
            aggregator.clone(),
            db.clone(),
            Duration::from_secs(config.refresh_interval * 60),
        )
        .await?,
    );
    auto_refresh.start().await;

    let state = Arc::new(AppState {
        aggregator,
        auto_refresh,
    });

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Server starting on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
