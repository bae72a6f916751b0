//! Collaborator contracts for the job and product status sources, plus the
//! HTTP backend used in production and an in-memory fixture backend.

use async_trait::async_trait;
use curate_core::{
    ActionOutcome, CurationJob, JobAction, JobFilter, JobId, ProductAction, ProductCounts,
    ProductFilter, ProductId, ProductPage,
};
use thiserror::Error;

pub mod fixture;
pub mod http;

pub use fixture::{load_fixture_dataset, FixtureBackend, FixtureCalls, FixtureDataset};
pub use http::{HttpBackend, HttpClientConfig};

pub const CRATE_NAME: &str = "curate-sources";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("action rejected: {0}")]
    Rejected(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Reports background scrape / AI-curation runs.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn jobs(&self, filter: &JobFilter) -> Result<Vec<CurationJob>, SourceError>;

    async fn job_action(&self, id: &JobId, action: JobAction)
        -> Result<CurationJob, SourceError>;
}

/// Reports per-product curation state and aggregate counts, and accepts
/// single-item mutations.
#[async_trait]
pub trait ProductStatusSource: Send + Sync {
    async fn products(&self, filter: &ProductFilter) -> Result<ProductPage, SourceError>;

    async fn product_counts(&self) -> Result<ProductCounts, SourceError>;

    async fn product_action(
        &self,
        id: &ProductId,
        action: ProductAction,
    ) -> Result<ActionOutcome, SourceError>;
}

/// Both collaborator roles behind one object, as served by the curation API.
pub trait CurationBackend: JobStatusSource + ProductStatusSource {}

impl<T> CurationBackend for T where T: JobStatusSource + ProductStatusSource {}
