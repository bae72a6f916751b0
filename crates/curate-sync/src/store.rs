//! In-memory curation state owned by the console.
//!
//! Only the refresh path ([`CurationStore::apply_snapshot`]) and the transition
//! path ([`CurationStore::begin_transition`] and its commit or rollback) change
//! product data. Everything else reads a cloned [`ConsoleState`].

use std::collections::BTreeSet;

use chrono::Utc;
use curate_core::{
    aggregate, validate_transition, CurationJob, CurationStats, CurationStatus, CurationTab,
    FilterPatch, ProductAction, ProductCounts, ProductFilter, ProductId, ProductPage,
    ScrapedProduct,
};
use serde::Serialize;
use tracing::debug;

use crate::activity::JobActivity;
use crate::bulk::{BulkActionResult, BulkOutcome};
use crate::error::ConsoleError;
use crate::scheduler::RefreshPolicyState;

/// Issued when a refresh starts; the snapshot it produces is only applied
/// while `sequence` is still the store's latest. The job part is applied
/// only if no later job read has landed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    pub sequence: u64,
    pub job_read: u64,
    pub filter: ProductFilter,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshSnapshot {
    pub page: ProductPage,
    pub counts: ProductCounts,
    pub jobs: Vec<CurationJob>,
}

/// An optimistic status change awaiting confirmation from the product source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    pub product_id: ProductId,
    pub previous: CurationStatus,
    pub target: CurationStatus,
    pub action: ProductAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleState {
    pub products: Vec<ScrapedProduct>,
    pub total_count: u64,
    pub counts: ProductCounts,
    pub stats: CurationStats,
    pub jobs: Vec<CurationJob>,
    pub has_active_jobs: bool,
    pub selection: BTreeSet<ProductId>,
    pub active_tab: CurationTab,
    pub filters: ProductFilter,
    pub refresh: RefreshPolicyState,
    pub bulk_in_progress: bool,
    pub last_bulk: Option<BulkActionResult>,
}

#[derive(Debug, Clone, Default)]
pub struct CurationStore {
    products: Vec<ScrapedProduct>,
    total_count: u64,
    counts: Option<ProductCounts>,
    stats: CurationStats,
    jobs: Vec<CurationJob>,
    has_active_jobs: bool,
    selection: BTreeSet<ProductId>,
    active_tab: CurationTab,
    filters: ProductFilter,
    sequence: u64,
    job_reads: u64,
    jobs_read: u64,
    last_bulk: Option<BulkActionResult>,
}

impl CurationStore {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            filters: ProductFilter {
                page_size: page_size.max(1),
                ..ProductFilter::default()
            },
            ..Self::default()
        }
    }

    pub fn products(&self) -> &[ScrapedProduct] {
        &self.products
    }

    pub fn product(&self, id: &ProductId) -> Option<&ScrapedProduct> {
        self.products.iter().find(|p| &p.id == id)
    }

    pub fn jobs(&self) -> &[CurationJob] {
        &self.jobs
    }

    pub fn has_active_jobs(&self) -> bool {
        self.has_active_jobs
    }

    pub fn stats(&self) -> &CurationStats {
        &self.stats
    }

    pub fn selection(&self) -> &BTreeSet<ProductId> {
        &self.selection
    }

    pub fn active_tab(&self) -> CurationTab {
        self.active_tab
    }

    pub fn last_bulk(&self) -> Option<&BulkActionResult> {
        self.last_bulk.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Predicate for the next product fetch: the filters narrowed by the tab.
    pub fn query(&self) -> ProductFilter {
        ProductFilter {
            status: self.active_tab.status(),
            ..self.filters.clone()
        }
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        RefreshTicket {
            sequence: self.sequence,
            job_read: self.begin_job_read(),
            filter: self.query(),
        }
    }

    /// Number the next read of the job source. Job data from a read is kept
    /// only if no later-numbered read has been applied.
    pub fn begin_job_read(&mut self) -> u64 {
        self.job_reads += 1;
        self.job_reads
    }

    /// Apply a fetched snapshot. Returns `false` and changes nothing when the
    /// tab or filters moved on since `ticket` was issued.
    pub fn apply_snapshot(&mut self, ticket: &RefreshTicket, snapshot: RefreshSnapshot) -> bool {
        if ticket.sequence != self.sequence {
            debug!(
                ticket = ticket.sequence,
                latest = self.sequence,
                "discarding stale snapshot"
            );
            return false;
        }
        let RefreshSnapshot { page, counts, jobs } = snapshot;
        self.stats = aggregate(&counts, self.counts.as_ref());
        self.counts = Some(counts);
        self.products = page.items;
        self.total_count = page.total_count;
        self.apply_jobs(ticket.job_read, JobActivity::from_jobs(jobs));
        true
    }

    /// Job data is not filtered by the tab; it is ordered by `read` instead.
    /// Returns `false` and keeps the current jobs when a later read already
    /// landed.
    pub fn apply_jobs(&mut self, read: u64, activity: JobActivity) -> bool {
        if read <= self.jobs_read {
            debug!(read, latest = self.jobs_read, "discarding stale job list");
            return false;
        }
        self.jobs_read = read;
        self.jobs = activity.jobs;
        self.has_active_jobs = activity.has_active_jobs;
        true
    }

    /// Record a job returned by a job action. It is newer than any job list
    /// still in flight.
    pub fn upsert_job(&mut self, job: CurationJob) {
        self.jobs_read = self.begin_job_read();
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
        self.has_active_jobs = crate::activity::has_active_jobs(&self.jobs);
    }

    fn invalidate_query(&mut self) {
        self.selection.clear();
        self.sequence += 1;
    }

    /// Returns whether the tab changed.
    pub fn set_tab(&mut self, tab: CurationTab) -> bool {
        if self.active_tab == tab {
            return false;
        }
        self.active_tab = tab;
        self.filters.page = 1;
        self.invalidate_query();
        true
    }

    /// Returns whether the effective filters changed. A patch that leaves the
    /// page untouched resets it to the first page.
    pub fn set_filters(&mut self, patch: &FilterPatch) -> bool {
        let mut next = self.filters.clone();
        if patch.page.is_none() {
            next.page = 1;
        }
        patch.apply_to(&mut next);
        if next == self.filters {
            return false;
        }
        self.filters = next;
        self.invalidate_query();
        true
    }

    pub fn select_product(&mut self, id: &ProductId, selected: bool) -> Result<(), ConsoleError> {
        if selected {
            if self.product(id).is_none() {
                return Err(ConsoleError::UnknownProduct(id.clone()));
            }
            self.selection.insert(id.clone());
        } else {
            self.selection.remove(id);
        }
        Ok(())
    }

    /// Select every product on the current page, or clear the selection.
    pub fn select_all(&mut self, selected: bool) {
        if selected {
            self.selection
                .extend(self.products.iter().map(|p| p.id.clone()));
        } else {
            self.selection.clear();
        }
    }

    /// Validate and optimistically apply a status change.
    pub fn begin_transition(
        &mut self,
        id: &ProductId,
        target: CurationStatus,
    ) -> Result<PendingTransition, ConsoleError> {
        let product = self
            .products
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| ConsoleError::UnknownProduct(id.clone()))?;
        let previous = product.curation_status;
        let action = validate_transition(previous, target).map_err(|source| {
            ConsoleError::InvalidTransition {
                product_id: id.clone(),
                source,
            }
        })?;
        product.curation_status = target;
        Ok(PendingTransition {
            product_id: id.clone(),
            previous,
            target,
            action,
        })
    }

    pub fn commit_transition(&mut self, pending: &PendingTransition) {
        if let Some(product) = self
            .products
            .iter_mut()
            .find(|p| p.id == pending.product_id && p.curation_status == pending.target)
        {
            product.updated_at = Some(Utc::now());
        }
    }

    /// Revert an optimistic change. A product whose status no longer matches
    /// the optimistic target was overwritten by a newer snapshot and is left
    /// alone. Returns whether anything was reverted.
    pub fn rollback_transition(&mut self, pending: &PendingTransition) -> bool {
        match self
            .products
            .iter_mut()
            .find(|p| p.id == pending.product_id && p.curation_status == pending.target)
        {
            Some(product) => {
                product.curation_status = pending.previous;
                true
            }
            None => false,
        }
    }

    pub fn remove_product(&mut self, id: &ProductId) {
        let before = self.products.len();
        self.products.retain(|p| &p.id != id);
        if self.products.len() < before {
            self.total_count = self.total_count.saturating_sub(1);
        }
        self.selection.remove(id);
    }

    /// Adjust the selection after a bulk action and remember the result for
    /// retries: full success clears it, partial failure keeps exactly the
    /// failed ids, total failure leaves it untouched.
    pub fn reconcile_selection(&mut self, result: &BulkActionResult) -> BulkOutcome {
        let outcome = result.outcome();
        match outcome {
            BulkOutcome::Success => self.selection.clear(),
            BulkOutcome::Partial => {
                self.selection = result.failed.keys().cloned().collect();
            }
            BulkOutcome::Failed => {}
        }
        self.last_bulk = Some(result.clone());
        outcome
    }

    pub fn snapshot(&self, refresh: RefreshPolicyState, bulk_in_progress: bool) -> ConsoleState {
        ConsoleState {
            products: self.products.clone(),
            total_count: self.total_count,
            counts: self.counts.clone().unwrap_or_default(),
            stats: self.stats.clone(),
            jobs: self.jobs.clone(),
            has_active_jobs: self.has_active_jobs,
            selection: self.selection.clone(),
            active_tab: self.active_tab,
            filters: self.filters.clone(),
            refresh,
            bulk_in_progress,
            last_bulk: self.last_bulk.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use curate_core::{BulkAction, JobId, JobStatus, JobType, SourceMetadata};

    fn product(id: &str, status: CurationStatus) -> ScrapedProduct {
        ScrapedProduct {
            id: ProductId::new(id),
            title: format!("Item {id}"),
            brand: None,
            curation_status: status,
            confidence_score: None,
            source: SourceMetadata {
                marketplace: "tokopedia".into(),
                scraped_at: Utc::now(),
                source_url: None,
            },
            updated_at: None,
        }
    }

    fn job(id: &str, status: JobStatus) -> CurationJob {
        CurationJob {
            id: JobId::new(id),
            job_type: JobType::Scrape,
            status,
            processed_count: 0,
            success_count: 0,
            error_count: 0,
            total_count: 0,
            started_at: None,
            finished_at: None,
        }
    }

    fn snapshot(items: Vec<ScrapedProduct>, counts: ProductCounts) -> RefreshSnapshot {
        RefreshSnapshot {
            page: ProductPage {
                total_count: items.len() as u64,
                items,
            },
            counts,
            jobs: vec![],
        }
    }

    fn loaded(items: Vec<ScrapedProduct>) -> CurationStore {
        let mut store = CurationStore::default();
        let ticket = store.begin_refresh();
        assert!(store.apply_snapshot(&ticket, snapshot(items, ProductCounts::default())));
        store
    }

    #[test]
    fn stale_snapshot_is_discarded_after_tab_change() {
        let mut store = loaded(vec![product("old", CurationStatus::Pending)]);
        let stale = store.begin_refresh();
        assert_eq!(stale.filter.status, None);

        assert!(store.set_tab(CurationTab::Curated));
        let fresh = store.begin_refresh();
        assert_eq!(fresh.filter.status, Some(CurationStatus::Curated));

        let curated = vec![product("c", CurationStatus::Curated)];
        assert!(store.apply_snapshot(&fresh, snapshot(curated, ProductCounts::default())));
        // The older request resolves last and must not overwrite the fresher data.
        let pending = vec![product("x", CurationStatus::Pending)];
        assert!(!store.apply_snapshot(&stale, snapshot(pending, ProductCounts::default())));
        assert_eq!(store.products().len(), 1);
        assert_eq!(store.products()[0].id, ProductId::from("c"));
    }

    #[test]
    fn tab_and_filter_changes_clear_selection() {
        let mut store = loaded(vec![product("a", CurationStatus::Pending)]);
        store.select_all(true);
        assert_eq!(store.selection().len(), 1);
        store.set_tab(CurationTab::Pending);
        assert!(store.selection().is_empty());

        store.select_product(&"a".into(), true).unwrap();
        let changed = store.set_filters(&FilterPatch {
            search: Some(Some("lamp".into())),
            ..FilterPatch::default()
        });
        assert!(changed);
        assert!(store.selection().is_empty());
        assert_eq!(store.query().search.as_deref(), Some("lamp"));
    }

    #[test]
    fn no_op_changes_keep_sequence() {
        let mut store = CurationStore::default();
        let seq = store.sequence();
        assert!(!store.set_tab(CurationTab::All));
        assert!(!store.set_filters(&FilterPatch::default()));
        assert_eq!(store.sequence(), seq);
    }

    #[test]
    fn filter_change_resets_page_unless_given() {
        let mut store = CurationStore::default();
        store.set_filters(&FilterPatch {
            page: Some(3),
            ..FilterPatch::default()
        });
        assert_eq!(store.query().page, 3);
        store.set_filters(&FilterPatch {
            search: Some(Some("rug".into())),
            ..FilterPatch::default()
        });
        assert_eq!(store.query().page, 1);
    }

    #[test]
    fn selecting_unknown_product_fails() {
        let mut store = loaded(vec![product("a", CurationStatus::Pending)]);
        let err = store.select_product(&"zzz".into(), true).unwrap_err();
        assert!(matches!(err, ConsoleError::UnknownProduct(_)));
        store.select_product(&"zzz".into(), false).unwrap();
    }

    #[test]
    fn invalid_transition_leaves_product_untouched() {
        let mut store = loaded(vec![product("a", CurationStatus::Pending)]);
        let err = store
            .begin_transition(&"a".into(), CurationStatus::SentToPim)
            .unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidTransition { .. }));
        assert_eq!(store.product(&"a".into()).unwrap().curation_status, CurationStatus::Pending);
    }

    #[test]
    fn rollback_restores_prior_status_only_if_still_optimistic() {
        let mut store = loaded(vec![product("a", CurationStatus::Processing)]);
        let pending = store.begin_transition(&"a".into(), CurationStatus::Curated).unwrap();
        assert_eq!(store.product(&"a".into()).unwrap().curation_status, CurationStatus::Curated);
        assert!(store.rollback_transition(&pending));
        assert_eq!(store.product(&"a".into()).unwrap().curation_status, CurationStatus::Processing);

        let pending = store.begin_transition(&"a".into(), CurationStatus::Rejected).unwrap();
        let ticket = store.begin_refresh();
        let curated = vec![product("a", CurationStatus::Curated)];
        store.apply_snapshot(&ticket, snapshot(curated, ProductCounts::default()));
        assert!(!store.rollback_transition(&pending));
        assert_eq!(store.product(&"a".into()).unwrap().curation_status, CurationStatus::Curated);
    }

    #[test]
    fn reconcile_follows_bulk_outcome() {
        let mut store = loaded(
            ["p1", "p2", "p3"]
                .iter()
                .map(|id| product(id, CurationStatus::Processing))
                .collect(),
        );
        store.select_all(true);

        let mut result = BulkActionResult {
            action: BulkAction::Approve,
            succeeded: BTreeSet::from(["p1".into()]),
            failed: BTreeMap::from([
                ("p2".into(), "boom".to_string()),
                ("p3".into(), "boom".to_string()),
            ]),
            total_requested: 3,
        };
        assert_eq!(store.reconcile_selection(&result), BulkOutcome::Partial);
        assert_eq!(
            store.selection().iter().cloned().collect::<Vec<_>>(),
            vec![ProductId::from("p2"), ProductId::from("p3")]
        );

        result.succeeded.clear();
        result.failed.insert("p1".into(), "boom".into());
        assert_eq!(store.reconcile_selection(&result), BulkOutcome::Failed);
        assert_eq!(store.selection().len(), 2);

        result.failed.clear();
        result.succeeded = BTreeSet::from(["p2".into(), "p3".into()]);
        result.total_requested = 2;
        assert_eq!(store.reconcile_selection(&result), BulkOutcome::Success);
        assert!(store.selection().is_empty());
        assert_eq!(store.last_bulk(), Some(&result));
    }

    #[test]
    fn snapshot_recomputes_stats_with_trend() {
        let mut store = CurationStore::default();
        let counts = |avg| ProductCounts {
            pending: 2,
            curated: 1,
            rejected: 1,
            total: 4,
            avg_confidence: Some(avg),
            ..ProductCounts::default()
        };
        let ticket = store.begin_refresh();
        store.apply_snapshot(&ticket, snapshot(vec![], counts(70.0)));
        assert_eq!(store.stats().completion_rate, 0.25);
        assert_eq!(store.stats().confidence_trend, curate_core::ConfidenceTrend::Unknown);

        let ticket = store.begin_refresh();
        store.apply_snapshot(&ticket, snapshot(vec![], counts(75.0)));
        assert_eq!(store.stats().confidence_trend, curate_core::ConfidenceTrend::Rising);
    }

    #[test]
    fn older_job_read_does_not_overwrite_newer_job_data() {
        let mut store = CurationStore::default();
        let slow = store.begin_refresh();

        let heartbeat = store.begin_job_read();
        let running = JobActivity::from_jobs(vec![job("j1", JobStatus::Running)]);
        assert!(store.apply_jobs(heartbeat, running));
        assert!(store.has_active_jobs());

        // The refresh read jobs before j1 started but lands afterwards.
        let products = vec![product("a", CurationStatus::Pending)];
        assert!(store.apply_snapshot(&slow, snapshot(products, ProductCounts::default())));
        assert_eq!(store.products().len(), 1);
        assert!(store.has_active_jobs());
        assert_eq!(store.jobs().len(), 1);

        let stale = store.begin_job_read();
        store.upsert_job(job("j1", JobStatus::Cancelled));
        let late = JobActivity::from_jobs(vec![job("j1", JobStatus::Running)]);
        assert!(!store.apply_jobs(stale, late));
        assert!(!store.has_active_jobs());
    }

    #[test]
    fn job_upsert_recomputes_activity() {
        let mut store = CurationStore::default();
        store.upsert_job(job("j1", JobStatus::Running));
        assert!(store.has_active_jobs());
        let mut job = store.jobs()[0].clone();
        job.status = JobStatus::Cancelled;
        store.upsert_job(job);
        assert!(!store.has_active_jobs());
        assert_eq!(store.jobs().len(), 1);
    }
}
