//! Adaptive refresh scheduling.
//!
//! The cadence is a pure function of [`RefreshPolicyState`] ([`compute_interval`]);
//! [`RefreshScheduler`] owns the single timer loop and the single-flight flag
//! guarding the refresh path. A request arriving while a refresh is in flight
//! is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::ConsoleError;
use crate::notify::Notifier;

pub const ACTIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const IDLE_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// A refresh whose snapshot was superseded by a tab or filter change re-runs
/// under the new predicate at most this many times before giving up.
pub const MAX_SUPERSEDED_REFETCHES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub active: Duration,
    pub idle: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            active: ACTIVE_INTERVAL,
            idle: IDLE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshPolicyState {
    pub auto_refresh_enabled: bool,
    pub has_active_jobs: bool,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub visible: bool,
    pub refreshing: bool,
}

impl Default for RefreshPolicyState {
    fn default() -> Self {
        Self {
            auto_refresh_enabled: false,
            has_active_jobs: false,
            last_refresh_at: None,
            visible: true,
            refreshing: false,
        }
    }
}

/// `None` means no timer runs and only manual refreshes happen.
pub fn compute_interval(
    state: &RefreshPolicyState,
    intervals: &RefreshIntervals,
) -> Option<Duration> {
    if !state.auto_refresh_enabled || !state.visible {
        return None;
    }
    if state.has_active_jobs {
        Some(intervals.active)
    } else {
        Some(intervals.idle)
    }
}

/// Result of one refresh cycle as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Job presence held by the store once the cycle finished.
    pub has_active_jobs: bool,
    /// `false` when the snapshot was superseded by a newer query and dropped.
    pub applied: bool,
}

/// The work performed by one refresh: fetch, recompute, apply.
#[async_trait]
pub trait RefreshCycle: Send + Sync {
    async fn refresh_cycle(&self) -> Result<CycleReport, ConsoleError>;
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Completed { has_active_jobs: bool },
    Stale,
    Skipped,
    Failed(ConsoleError),
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Stale => "stale",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct ToggleOutcome {
    pub enabled: bool,
    /// The immediate refresh issued when auto-refresh is switched on.
    pub refresh: Option<RefreshOutcome>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RefreshScheduler {
    intervals: RefreshIntervals,
    policy: Mutex<RefreshPolicyState>,
    in_flight: AtomicBool,
    wake: Notify,
    target: Arc<dyn RefreshCycle>,
    notifier: Notifier,
}

impl RefreshScheduler {
    pub fn new(
        intervals: RefreshIntervals,
        auto_refresh_enabled: bool,
        target: Arc<dyn RefreshCycle>,
        notifier: Notifier,
    ) -> Self {
        Self {
            intervals,
            policy: Mutex::new(RefreshPolicyState {
                auto_refresh_enabled,
                ..RefreshPolicyState::default()
            }),
            in_flight: AtomicBool::new(false),
            wake: Notify::new(),
            target,
            notifier,
        }
    }

    fn policy(&self) -> MutexGuard<'_, RefreshPolicyState> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy_state(&self) -> RefreshPolicyState {
        let mut state = self.policy().clone();
        state.refreshing = self.in_flight.load(Ordering::Acquire);
        state
    }

    pub fn next_interval(&self) -> Option<Duration> {
        compute_interval(&self.policy(), &self.intervals)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one refresh unless one is already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already in flight; dropping request");
            return RefreshOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut refetches = 0;
        let outcome = loop {
            match self.target.refresh_cycle().await {
                Ok(CycleReport {
                    has_active_jobs,
                    applied: true,
                }) => {
                    let mut policy = self.policy();
                    policy.has_active_jobs = has_active_jobs;
                    policy.last_refresh_at = Some(Utc::now());
                    info!(has_active_jobs, "refresh completed");
                    break RefreshOutcome::Completed { has_active_jobs };
                }
                Ok(CycleReport { applied: false, .. }) if refetches < MAX_SUPERSEDED_REFETCHES => {
                    refetches += 1;
                    debug!(refetches, "snapshot superseded by a newer query; refetching");
                }
                Ok(CycleReport { applied: false, .. }) => {
                    debug!("snapshot superseded by a newer query; discarded");
                    break RefreshOutcome::Stale;
                }
                Err(err) => {
                    warn!(error = %err, "refresh failed");
                    self.notifier.error(format!("Refresh failed: {err}"));
                    break RefreshOutcome::Failed(err);
                }
            }
        };
        self.wake.notify_one();
        outcome
    }

    pub async fn manual_refresh(&self) -> RefreshOutcome {
        self.refresh().await
    }

    pub async fn toggle_auto_refresh(&self) -> ToggleOutcome {
        let enabled = {
            let mut policy = self.policy();
            policy.auto_refresh_enabled = !policy.auto_refresh_enabled;
            policy.auto_refresh_enabled
        };
        info!(enabled, "auto-refresh toggled");
        self.wake.notify_one();
        let refresh = if enabled {
            Some(self.refresh().await)
        } else {
            None
        };
        ToggleOutcome { enabled, refresh }
    }

    /// Suspend the timer while the hosting view is hidden.
    pub fn set_visible(&self, visible: bool) {
        let changed = {
            let mut policy = self.policy();
            std::mem::replace(&mut policy.visible, visible) != visible
        };
        if changed {
            debug!(visible, "view visibility changed");
            self.wake.notify_one();
        }
    }

    /// Record job presence discovered outside a refresh (heartbeat).
    /// Returns whether the flag changed.
    pub fn observe_activity(&self, has_active_jobs: bool) -> bool {
        let changed = {
            let mut policy = self.policy();
            std::mem::replace(&mut policy.has_active_jobs, has_active_jobs) != has_active_jobs
        };
        if changed {
            info!(has_active_jobs, "job activity changed");
            self.wake.notify_one();
        }
        changed
    }

    /// Timer loop. Re-evaluates the interval after every refresh and whenever
    /// the policy changes; runs until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.next_interval() {
                Some(interval) => {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            let outcome = self.refresh().await;
                            debug!(outcome = outcome.label(), "scheduled refresh");
                        }
                        _ = self.wake.notified() => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
    }
}
