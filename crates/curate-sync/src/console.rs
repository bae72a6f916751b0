//! The facade a UI drives: owns the store, the scheduler, the bulk coordinator
//! and the background tasks.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use curate_core::{
    BulkAction, CurationJob, CurationStatus, CurationTab, FilterPatch, JobAction, JobId,
    ProductId,
};
use curate_sources::{
    CurationBackend, FixtureBackend, HttpBackend, JobStatusSource, ProductStatusSource,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::activity::ActivityDetector;
use crate::bulk::{BulkActionCoordinator, BulkActionResult, BulkOutcome};
use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use crate::notify::{Notification, Notifier};
use crate::scheduler::{CycleReport, RefreshCycle, RefreshOutcome, RefreshScheduler, ToggleOutcome};
use crate::store::{ConsoleState, CurationStore, RefreshSnapshot};
use crate::transition::apply_transition;

/// Everything the console needs from its surroundings: the two collaborators
/// and the settings. Credentials travel inside the collaborators.
#[derive(Clone)]
pub struct ConsoleContext {
    pub jobs: Arc<dyn JobStatusSource>,
    pub products: Arc<dyn ProductStatusSource>,
    pub config: ConsoleConfig,
}

impl ConsoleContext {
    pub fn from_backend<B>(backend: Arc<B>, config: ConsoleConfig) -> Self
    where
        B: CurationBackend + 'static,
    {
        Self {
            jobs: backend.clone(),
            products: backend,
            config,
        }
    }

    pub fn http(config: ConsoleConfig) -> Result<Self> {
        let backend = HttpBackend::new(config.http_client_config())
            .with_context(|| format!("building curation API client for {}", config.api_base_url))?;
        Ok(Self::from_backend(Arc::new(backend), config))
    }

    pub fn fixture(path: &Path, config: ConsoleConfig) -> Result<Self> {
        let backend = FixtureBackend::from_path(path)?;
        Ok(Self::from_backend(Arc::new(backend), config))
    }
}

/// The refresh target: fetch jobs, products and counts together and apply
/// them under the ticket taken at the start.
struct ConsoleCore {
    store: Mutex<CurationStore>,
    products: Arc<dyn ProductStatusSource>,
    detector: ActivityDetector,
}

#[async_trait]
impl RefreshCycle for ConsoleCore {
    async fn refresh_cycle(&self) -> Result<CycleReport, ConsoleError> {
        let ticket = self.store.lock().await.begin_refresh();
        let (activity, page, counts) = tokio::try_join!(
            self.detector.poll(),
            self.products.products(&ticket.filter),
            self.products.product_counts(),
        )?;
        let mut store = self.store.lock().await;
        let applied = store.apply_snapshot(
            &ticket,
            RefreshSnapshot {
                page,
                counts,
                jobs: activity.jobs,
            },
        );
        // Job state as stored, which may come from a newer heartbeat read.
        Ok(CycleReport {
            has_active_jobs: store.has_active_jobs(),
            applied,
        })
    }
}

pub struct CurationConsole {
    core: Arc<ConsoleCore>,
    scheduler: Arc<RefreshScheduler>,
    bulk: BulkActionCoordinator,
    jobs: Arc<dyn JobStatusSource>,
    heartbeat: Duration,
    notifier: Notifier,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl CurationConsole {
    pub fn new(context: ConsoleContext) -> Self {
        let ConsoleContext {
            jobs,
            products,
            config,
        } = context;
        let notifier = Notifier::default();
        let core = Arc::new(ConsoleCore {
            store: Mutex::new(CurationStore::with_page_size(config.page_size)),
            products,
            detector: ActivityDetector::new(jobs.clone()),
        });
        let scheduler = Arc::new(RefreshScheduler::new(
            config.intervals(),
            config.auto_refresh,
            core.clone(),
            notifier.clone(),
        ));
        Self {
            core,
            scheduler,
            bulk: BulkActionCoordinator::new(config.bulk_concurrency),
            jobs,
            heartbeat: config.heartbeat_interval(),
            notifier,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Load the first snapshot and start the refresh timer and the job
    /// heartbeat. Calling it again only refreshes.
    pub async fn init(&self) -> RefreshOutcome {
        let outcome = self.scheduler.refresh().await;
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            tasks.push(tokio::spawn(self.scheduler.clone().run()));
            tasks.push(tokio::spawn(heartbeat(
                self.core.clone(),
                self.scheduler.clone(),
                self.heartbeat,
            )));
            info!(heartbeat_secs = self.heartbeat.as_secs(), "curation console started");
        }
        outcome
    }

    /// Stop background tasks. In-flight calls are not cancelled; their
    /// results simply have nobody left to observe them.
    pub fn teardown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("curation console stopped");
    }

    pub fn is_running(&self) -> bool {
        !self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub async fn state(&self) -> ConsoleState {
        self.core
            .store
            .lock()
            .await
            .snapshot(self.scheduler.policy_state(), self.bulk.is_running())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub async fn select_product(&self, id: &ProductId, selected: bool) -> Result<(), ConsoleError> {
        self.core.store.lock().await.select_product(id, selected)
    }

    pub async fn select_all(&self, selected: bool) {
        self.core.store.lock().await.select_all(selected);
    }

    /// Switch the status tab and fetch under the new predicate.
    pub async fn set_tab(&self, tab: CurationTab) -> Option<RefreshOutcome> {
        let changed = self.core.store.lock().await.set_tab(tab);
        if !changed {
            return None;
        }
        debug!(?tab, "tab changed");
        Some(self.scheduler.refresh().await)
    }

    pub async fn set_filters(&self, patch: &FilterPatch) -> Option<RefreshOutcome> {
        let changed = self.core.store.lock().await.set_filters(patch);
        if !changed {
            return None;
        }
        debug!(?patch, "filters changed");
        Some(self.scheduler.refresh().await)
    }

    pub async fn toggle_auto_refresh(&self) -> ToggleOutcome {
        self.scheduler.toggle_auto_refresh().await
    }

    pub async fn manual_refresh(&self) -> RefreshOutcome {
        self.scheduler.manual_refresh().await
    }

    pub fn set_visible(&self, visible: bool) {
        self.scheduler.set_visible(visible);
    }

    /// Move a single product along the lifecycle graph. Counts and stats
    /// catch up through a refresh after the move is confirmed.
    pub async fn apply_transition(
        &self,
        id: &ProductId,
        target: CurationStatus,
    ) -> Result<(), ConsoleError> {
        match apply_transition(&self.core.store, self.core.products.as_ref(), id, target).await {
            Ok(()) => {
                self.scheduler.refresh().await;
                Ok(())
            }
            Err(err) => {
                if err.is_transient() {
                    self.notifier.error(format!("Could not update {id}: {err}"));
                }
                Err(err)
            }
        }
    }

    /// Apply `action` to the current selection and reconcile the selection
    /// with the per-item results.
    pub async fn run_bulk_action(
        &self,
        action: BulkAction,
    ) -> Result<BulkActionResult, ConsoleError> {
        let ids: Vec<ProductId> = self
            .core
            .store
            .lock()
            .await
            .selection()
            .iter()
            .cloned()
            .collect();
        let result = self
            .bulk
            .execute(&self.core.store, self.core.products.as_ref(), action, ids)
            .await?;

        let outcome = self.core.store.lock().await.reconcile_selection(&result);
        let summary = result.summary();
        match outcome {
            BulkOutcome::Success => {
                self.notifier.info(summary);
                self.scheduler.refresh().await;
            }
            BulkOutcome::Partial => {
                self.notifier.warning(summary);
                self.scheduler.refresh().await;
            }
            BulkOutcome::Failed => {
                warn!(
                    action = action.as_str(),
                    failed = result.failed.len(),
                    "bulk action failed for every item"
                );
                self.notifier.error(summary);
            }
        }
        Ok(result)
    }

    /// Re-run the last bulk action over the current selection, which after a
    /// partial failure is exactly the failed ids.
    pub async fn retry_failed(&self) -> Result<BulkActionResult, ConsoleError> {
        let action = {
            let store = self.core.store.lock().await;
            match store.last_bulk() {
                Some(last) if last.outcome() != BulkOutcome::Success => last.action,
                _ => return Err(ConsoleError::NothingToRetry),
            }
        };
        self.run_bulk_action(action).await
    }

    pub async fn job_action(
        &self,
        id: &JobId,
        action: JobAction,
    ) -> Result<CurationJob, ConsoleError> {
        let job = self
            .jobs
            .job_action(id, action)
            .await
            .map_err(|err| ConsoleError::job_action(id, action, err))?;
        info!(
            job_id = %id,
            action = action.as_str(),
            status = job.status.as_str(),
            "job action applied"
        );

        let has_active_jobs = {
            let mut store = self.core.store.lock().await;
            store.upsert_job(job.clone());
            store.has_active_jobs()
        };
        self.scheduler.observe_activity(has_active_jobs);
        Ok(job)
    }
}

impl Drop for CurationConsole {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Job-only poll, independent of auto-refresh. Keeps job presence current so
/// the scheduler can switch cadence between full refreshes.
async fn heartbeat(core: Arc<ConsoleCore>, scheduler: Arc<RefreshScheduler>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let read = core.store.lock().await.begin_job_read();
        match core.detector.poll().await {
            Ok(activity) => {
                let mut store = core.store.lock().await;
                if store.apply_jobs(read, activity) {
                    scheduler.observe_activity(store.has_active_jobs());
                }
            }
            Err(err) => debug!(error = %err, "job heartbeat failed"),
        }
    }
}
