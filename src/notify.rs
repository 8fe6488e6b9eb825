//! Notifications for newly seen articles.
//!
//! A burst of new articles produces at most [`MAX_NOTIFICATIONS`] requests,
//! delivered [`NOTIFICATION_STAGGER`] apart so the host is not flooded.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::article::Article;

pub const MAX_NOTIFICATIONS: usize = 5;
pub const NOTIFICATION_STAGGER: Duration = Duration::from_millis(500);
pub const NOTIFICATION_TITLE: &str = "New F1 News";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    /// Article id; hosts replace an existing notification with the same tag
    pub tag: String,
    pub link: String,
}

impl NotificationRequest {
    pub fn for_article(article: &Article) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: format!("{}: {}", article.source_name, article.title),
            tag: article.id.clone(),
            link: article.link.clone(),
        }
    }

    /// Target opened when the user activates the notification.
    pub fn activate(&self) -> &str {
        &self.link
    }
}

/// The platform surface that actually shows notifications. Permission is
/// the host's concern; the dispatcher is only built when it was granted.
pub trait NotificationHost: Send + Sync {
    fn show(&self, request: NotificationRequest);
}

/// Host that writes notifications to the log.
pub struct LogNotificationHost;

impl NotificationHost for LogNotificationHost {
    fn show(&self, request: NotificationRequest) {
        info!(tag = %request.tag, link = %request.activate(), "{}: {}", request.title, request.body);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    host: Arc<dyn NotificationHost>,
}

impl Dispatcher {
    pub fn new(host: Arc<dyn NotificationHost>) -> Self {
        Self { host }
    }

    /// The requests for a novelty list, each with its delivery delay.
    pub fn plan(novel: &[Article]) -> Vec<(Duration, NotificationRequest)> {
        novel
            .iter()
            .take(MAX_NOTIFICATIONS)
            .enumerate()
            .map(|(index, article)| {
                (
                    NOTIFICATION_STAGGER * index as u32,
                    NotificationRequest::for_article(article),
                )
            })
            .collect()
    }

    /// Deliver notifications in the background. Returns `None` when there is
    /// nothing to send.
    pub fn notify(&self, novel: &[Article]) -> Option<JoinHandle<()>> {
        let plan = Self::plan(novel);
        if plan.is_empty() {
            return None;
        }

        let host = self.host.clone();
        Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for (delay, request) in plan {
                tokio::time::sleep_until(start + delay).await;
                host.show(request);
            }
        }))
    }
}
