//! In-memory curation backend, seeded from a JSON fixture.
//!
//! Applies the same rules the curation API enforces (lifecycle edges, job
//! start/cancel) so the console can be driven end to end without a server.
//! Outages, per-product failures and latency can be injected for tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use curate_core::{
    validate_transition, ActionOutcome, CurationJob, CurationStatus, JobAction, JobFilter, JobId,
    JobStatus, ProductAction, ProductCounts, ProductFilter, ProductId, ProductPage,
    ScrapedProduct,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{JobStatusSource, ProductStatusSource, SourceError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureDataset {
    #[serde(default)]
    pub products: Vec<ScrapedProduct>,
    #[serde(default)]
    pub jobs: Vec<CurationJob>,
}

pub fn load_fixture_dataset(path: impl AsRef<Path>) -> Result<FixtureDataset> {
    let path = path.as_ref();
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Number of calls served per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixtureCalls {
    pub jobs: usize,
    pub products: usize,
    pub counts: usize,
    pub product_actions: usize,
    pub job_actions: usize,
}

#[derive(Debug, Default)]
struct FixtureState {
    products: Vec<ScrapedProduct>,
    jobs: Vec<CurationJob>,
    failing_products: HashSet<ProductId>,
    offline: bool,
    latency: Duration,
}

#[derive(Debug, Default)]
pub struct FixtureBackend {
    state: Mutex<FixtureState>,
    jobs_calls: AtomicUsize,
    products_calls: AtomicUsize,
    counts_calls: AtomicUsize,
    product_action_calls: AtomicUsize,
    job_action_calls: AtomicUsize,
}

impl FixtureBackend {
    pub fn new(dataset: FixtureDataset) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                products: dataset.products,
                jobs: dataset.jobs,
                ..FixtureState::default()
            }),
            ..Self::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_dataset(path)?))
    }

    /// Every following call fails with [`SourceError::Unavailable`] while set.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Actions on `id` are answered with `success: false`.
    pub async fn fail_product(&self, id: impl Into<ProductId>) {
        self.state.lock().await.failing_products.insert(id.into());
    }

    pub async fn upsert_job(&self, job: CurationJob) {
        let mut state = self.state.lock().await;
        match state.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => state.jobs.push(job),
        }
    }

    pub async fn product_status(&self, id: &ProductId) -> Option<CurationStatus> {
        let state = self.state.lock().await;
        state
            .products
            .iter()
            .find(|p| &p.id == id)
            .map(|p| p.curation_status)
    }

    pub fn calls(&self) -> FixtureCalls {
        FixtureCalls {
            jobs: self.jobs_calls.load(Ordering::SeqCst),
            products: self.products_calls.load(Ordering::SeqCst),
            counts: self.counts_calls.load(Ordering::SeqCst),
            product_actions: self.product_action_calls.load(Ordering::SeqCst),
            job_actions: self.job_action_calls.load(Ordering::SeqCst),
        }
    }

    async fn gate(&self, counter: &AtomicUsize) -> Result<(), SourceError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let (offline, latency) = {
            let state = self.state.lock().await;
            (state.offline, state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(SourceError::Unavailable("fixture backend offline".into()));
        }
        Ok(())
    }
}

fn counts_for(products: &[ScrapedProduct], now: DateTime<Utc>) -> ProductCounts {
    let mut counts = ProductCounts {
        total: products.len() as u64,
        ..ProductCounts::default()
    };
    let mut confidence_sum = 0u64;
    let mut confidence_n = 0u64;

    for product in products {
        match product.curation_status {
            CurationStatus::Pending => counts.pending += 1,
            CurationStatus::Processing => counts.processing += 1,
            CurationStatus::Curated => counts.curated += 1,
            CurationStatus::Rejected => counts.rejected += 1,
            CurationStatus::SentToPim => counts.sent_to_pim += 1,
        }
        if let Some(score) = product.confidence_score {
            confidence_sum += u64::from(score);
            confidence_n += 1;
        }

        let curated = matches!(
            product.curation_status,
            CurationStatus::Curated | CurationStatus::SentToPim
        );
        if let (true, Some(updated_at)) = (curated, product.updated_at) {
            let age = now.signed_duration_since(updated_at);
            if age.num_days() < 1 {
                counts.today_curated += 1;
            }
            if age.num_days() < 7 {
                counts.week_curated += 1;
            }
            if age.num_days() < 30 {
                counts.month_curated += 1;
            }
        }
    }

    if confidence_n > 0 {
        counts.avg_confidence = Some(confidence_sum as f64 / confidence_n as f64);
    }
    counts
}

#[async_trait]
impl JobStatusSource for FixtureBackend {
    async fn jobs(&self, filter: &JobFilter) -> Result<Vec<CurationJob>, SourceError> {
        self.gate(&self.jobs_calls).await?;
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|job| filter.status.map_or(true, |status| job.status == status))
            .cloned()
            .collect())
    }

    async fn job_action(
        &self,
        id: &JobId,
        action: JobAction,
    ) -> Result<CurationJob, SourceError> {
        self.gate(&self.job_action_calls).await?;
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|job| &job.id == id)
            .ok_or_else(|| SourceError::NotFound(format!("job {id}")))?;

        match (action, job.status) {
            (JobAction::Start, JobStatus::Queued) => {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
            }
            (JobAction::Cancel, JobStatus::Queued | JobStatus::Running) => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
            }
            (action, status) => {
                return Err(SourceError::Rejected(format!(
                    "cannot {} job {id} while {}",
                    action.as_str(),
                    status.as_str()
                )));
            }
        }
        Ok(job.clone())
    }
}

#[async_trait]
impl ProductStatusSource for FixtureBackend {
    async fn products(&self, filter: &ProductFilter) -> Result<ProductPage, SourceError> {
        self.gate(&self.products_calls).await?;
        let state = self.state.lock().await;
        let matching = state
            .products
            .iter()
            .filter(|p| filter.matches(p))
            .collect::<Vec<_>>();
        let page_size = filter.page_size.max(1) as usize;
        let start = (filter.page.max(1) as usize - 1) * page_size;
        Ok(ProductPage {
            total_count: matching.len() as u64,
            items: matching
                .into_iter()
                .skip(start)
                .take(page_size)
                .cloned()
                .collect(),
        })
    }

    async fn product_counts(&self) -> Result<ProductCounts, SourceError> {
        self.gate(&self.counts_calls).await?;
        let state = self.state.lock().await;
        Ok(counts_for(&state.products, Utc::now()))
    }

    async fn product_action(
        &self,
        id: &ProductId,
        action: ProductAction,
    ) -> Result<ActionOutcome, SourceError> {
        self.gate(&self.product_action_calls).await?;
        let mut state = self.state.lock().await;
        if state.failing_products.contains(id) {
            return Ok(ActionOutcome::failed(format!(
                "{} rejected for {id}",
                action.as_str()
            )));
        }
        let Some(index) = state.products.iter().position(|p| &p.id == id) else {
            return Ok(ActionOutcome::failed(format!("product {id} not found")));
        };

        let Some(target) = action.target_status() else {
            state.products.remove(index);
            return Ok(ActionOutcome::ok());
        };
        let product = &mut state.products[index];
        if let Err(err) = validate_transition(product.curation_status, target) {
            return Ok(ActionOutcome::failed(err.to_string()));
        }
        product.curation_status = target;
        product.updated_at = Some(Utc::now());
        Ok(ActionOutcome::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use curate_core::{JobType, SourceMetadata};
    use std::io::Write;

    fn product(id: &str, status: CurationStatus, score: Option<u8>) -> ScrapedProduct {
        ScrapedProduct {
            id: ProductId::new(id),
            title: format!("Product {id}"),
            brand: None,
            curation_status: status,
            confidence_score: score,
            source: SourceMetadata {
                marketplace: "shopee".into(),
                scraped_at: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().unwrap(),
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
            total_count: 10,
            started_at: None,
            finished_at: None,
        }
    }

    fn backend() -> FixtureBackend {
        FixtureBackend::new(FixtureDataset {
            products: vec![
                product("a", CurationStatus::Pending, Some(60)),
                product("b", CurationStatus::Processing, Some(80)),
                product("c", CurationStatus::Curated, None),
            ],
            jobs: vec![job("j-1", JobStatus::Queued), job("j-2", JobStatus::Completed)],
        })
    }

    #[tokio::test]
    async fn actions_follow_lifecycle_edges() {
        let backend = backend();
        let ok = backend
            .product_action(&"b".into(), ProductAction::Approve)
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(
            backend.product_status(&"b".into()).await,
            Some(CurationStatus::Curated)
        );

        let refused = backend
            .product_action(&"a".into(), ProductAction::SendToPim)
            .await
            .unwrap();
        assert!(!refused.success);
        assert_eq!(
            backend.product_status(&"a".into()).await,
            Some(CurationStatus::Pending)
        );
    }

    #[tokio::test]
    async fn delete_removes_product() {
        let backend = backend();
        let outcome = backend
            .product_action(&"c".into(), ProductAction::Delete)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(backend.product_status(&"c".into()).await, None);
        assert_eq!(backend.product_counts().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn counts_and_pagination_follow_products() {
        let backend = backend();
        let counts = backend.product_counts().await.unwrap();
        assert_eq!((counts.pending, counts.processing, counts.curated), (1, 1, 1));
        assert_eq!(counts.total, 3);
        assert_eq!(counts.avg_confidence, Some(70.0));

        let page = backend
            .products(&ProductFilter {
                page: 2,
                page_size: 2,
                ..ProductFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, ProductId::new("c"));
    }

    #[tokio::test]
    async fn injected_failures_and_outages() {
        let backend = backend();
        backend.fail_product("b").await;
        let outcome = backend
            .product_action(&"b".into(), ProductAction::Approve)
            .await
            .unwrap();
        assert!(!outcome.success);

        backend.set_offline(true).await;
        assert!(matches!(
            backend.product_counts().await,
            Err(SourceError::Unavailable(_))
        ));
        assert_eq!(backend.calls().counts, 1);
        assert_eq!(backend.calls().product_actions, 1);
    }

    #[tokio::test]
    async fn job_start_and_cancel() {
        let backend = backend();
        let started = backend
            .job_action(&"j-1".into(), JobAction::Start)
            .await
            .unwrap();
        assert_eq!(started.status, JobStatus::Running);
        assert!(started.started_at.is_some());

        let running = backend
            .jobs(&JobFilter {
                status: Some(JobStatus::Running),
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);

        let err = backend
            .job_action(&"j-2".into(), JobAction::Cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Rejected(_)));

        let missing = backend
            .job_action(&"nope".into(), JobAction::Start)
            .await
            .unwrap_err();
        assert!(matches!(missing, SourceError::NotFound(_)));
    }

    #[test]
    fn dataset_loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"products": [{{"id": "x", "curation_status": "pending",
                "source": {{"marketplace": "ebay", "scraped_at": "2026-02-02T00:00:00Z"}}}}]}}"#
        )
        .unwrap();
        let dataset = load_fixture_dataset(file.path()).expect("load");
        assert_eq!(dataset.products.len(), 1);
        assert!(dataset.jobs.is_empty());
    }
}
