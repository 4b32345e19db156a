//! Per-project rate limiting for advisory activity pings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use deck_core::ProjectId;

use crate::config::ThrottleConfig;

/// Expiring `(project_id -> last_allowed_at)` map.
#[derive(Debug)]
pub struct ActivityThrottle {
    interval: Duration,
    last_allowed: Mutex<HashMap<ProjectId, Instant>>,
}

impl ActivityThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_allowed: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true (and records `now`) if `project` may ping again.
    pub fn allow(&self, project: &ProjectId, now: Instant) -> bool {
        let mut map = self.last_allowed.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(project) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => false,
            _ => {
                map.insert(project.clone(), now);
                true
            }
        }
    }

    /// Drops entries whose window has passed. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut map = self.last_allowed.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, last| now.saturating_duration_since(*last) < self.interval);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.last_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The two throttled ping classes.
#[derive(Debug)]
pub struct Throttles {
    /// `project.user_activity`, max 1/s by default.
    pub user: ActivityThrottle,
    /// `project.output_activity`, max 1/5 s by default.
    pub output: ActivityThrottle,
}

impl Throttles {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            user: ActivityThrottle::new(Duration::from_millis(config.user_activity_ms)),
            output: ActivityThrottle::new(Duration::from_millis(config.output_activity_ms)),
        }
    }
}

/// Spawns the background sweep; stops when `cancel` fires.
pub fn spawn_sweeper(
    throttles: Arc<Throttles>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let removed = throttles.user.sweep(now) + throttles.output.sweep(now);
                    if removed > 0 {
                        debug!(removed, "Swept activity throttle entries");
                    }
                }
            }
        }
    })
}
