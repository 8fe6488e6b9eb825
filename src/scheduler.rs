//! Periodic auto refresh.
//!
//! The timer runs only while auto refresh is enabled and the app is in the
//! foreground. Coming back to the foreground triggers an immediate cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::db::Database;

struct TimerState {
    enabled: bool,
    foreground: bool,
    timer: Option<JoinHandle<()>>,
}

pub struct AutoRefresh {
    aggregator: Arc<Aggregator>,
    db: Arc<Database>,
    interval: Duration,
    state: Mutex<TimerState>,
}

impl AutoRefresh {
    /// Restore the persisted flag; auto refresh is on unless the user turned
    /// it off. The timer is not started until [`AutoRefresh::start`].
    pub async fn load(
        aggregator: Arc<Aggregator>,
        db: Arc<Database>,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let enabled = db.load_auto_refresh().await?.unwrap_or(true);

        Ok(Self {
            aggregator,
            db,
            interval,
            state: Mutex::new(TimerState {
                enabled,
                foreground: true,
                timer: None,
            }),
        })
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Start the timer if auto refresh is enabled and in the foreground.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.enabled && state.foreground {
            self.restart_timer(&mut state);
        }
    }

    /// Flip and persist the auto refresh flag. Returns the new value.
    pub async fn toggle(&self) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        state.enabled = !state.enabled;
        self.db.save_auto_refresh(state.enabled).await?;

        if state.enabled {
            info!("Auto refresh enabled");
            if state.foreground {
                self.restart_timer(&mut state);
            }
        } else {
            info!("Auto refresh paused");
            stop_timer(&mut state);
        }

        Ok(state.enabled)
    }

    /// Foreground/background transition reported by the host.
    pub async fn set_foreground(&self, foreground: bool) {
        let mut state = self.state.lock().await;
        let was_foreground = state.foreground;
        state.foreground = foreground;

        if !foreground {
            stop_timer(&mut state);
            return;
        }

        if state.enabled {
            if !was_foreground {
                info!("Back in foreground, refreshing");
            }
            let aggregator = self.aggregator.clone();
            tokio::spawn(async move {
                if let Err(e) = aggregator.refresh().await {
                    error!("Foreground feed refresh failed: {}", e);
                }
            });
            self.restart_timer(&mut state);
        }
    }

    fn restart_timer(&self, state: &mut TimerState) {
        stop_timer(state);
        state.timer = Some(tokio::spawn(run_timer(self.aggregator.clone(), self.interval)));
    }
}

fn stop_timer(state: &mut TimerState) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}

async fn run_timer(aggregator: Arc<Aggregator>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed refresh");
        if let Err(e) = aggregator.refresh().await {
            error!("Scheduled feed refresh failed: {}", e);
        }
    }
}
