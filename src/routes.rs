use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::aggregator::{Aggregator, ArticleView, Snapshot};
use crate::article::Priority;
use crate::scheduler::AutoRefresh;
use crate::source::FeedSource;

pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub auto_refresh: Arc<AutoRefresh>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/articles", get(articles))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/feeds", get(feeds))
        .route("/feeds/:name/toggle", post(toggle_feed))
        .route("/auto-refresh", post(toggle_auto_refresh))
        .route("/visibility", post(visibility))
        .route("/health", get(health))
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub articles: Vec<ArticleRow>,
    pub last_update: String,
    pub error: Option<String>,
    pub auto_refresh: bool,
    pub refreshing: bool,
}

pub struct ArticleRow {
    pub source: String,
    pub time: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub category: String,
    pub category_class: String,
    pub high_priority: bool,
    pub is_new: bool,
}

impl From<ArticleView> for ArticleRow {
    fn from(view: ArticleView) -> Self {
        let article = view.article;
        Self {
            category_class: article.category.to_lowercase(),
            high_priority: article.priority == Priority::High,
            source: article.source_name,
            time: article.relative_time_label,
            title: article.title,
            summary: article.summary,
            link: article.link,
            category: article.category,
            is_new: view.is_new,
        }
    }
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.aggregator.snapshot().await;

    let last_update = snapshot
        .last_updated
        .map(|t| t.format("%-I:%M %p").to_string())
        .unwrap_or_else(|| "Never".to_string());

    HtmlTemplate(IndexTemplate {
        articles: snapshot.articles.into_iter().map(ArticleRow::from).collect(),
        last_update,
        error: snapshot
            .last_error
            .map(|e| format!("Failed to load news: {}", e)),
        auto_refresh: state.auto_refresh.is_enabled().await,
        refreshing: state.aggregator.is_refreshing(),
    })
}

pub async fn articles(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.aggregator.snapshot().await)
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let aggregator = state.aggregator.clone();
    tokio::spawn(async move {
        if let Err(e) = aggregator.refresh().await {
            error!("Manual feed refresh failed: {}", e);
        }
    });

    // Return refreshing state immediately
    HtmlTemplate(RefreshButtonTemplate { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.aggregator.is_refreshing();
    HtmlTemplate(RefreshButtonTemplate { refreshing })
}

pub async fn feeds(State(state): State<Arc<AppState>>) -> Json<Vec<FeedSource>> {
    Json(state.aggregator.sources().await)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedToggleResponse {
    pub name: String,
    pub enabled: bool,
}

pub async fn toggle_feed(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let Some(enabled) = state.aggregator.toggle_source(&name).await? else {
        return Ok((StatusCode::NOT_FOUND, format!("Unknown feed: {}", name)).into_response());
    };

    Ok(Json(FeedToggleResponse { name, enabled }).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoRefreshResponse {
    pub enabled: bool,
}

pub async fn toggle_auto_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AutoRefreshResponse>, AppError> {
    let enabled = state.auto_refresh.toggle().await?;
    Ok(Json(AutoRefreshResponse { enabled }))
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

pub async fn visibility(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VisibilityRequest>,
) -> StatusCode {
    state.auto_refresh.set_foreground(request.visible).await;
    StatusCode::NO_CONTENT
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
