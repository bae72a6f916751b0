use curate_core::{JobAction, JobId, ProductAction, ProductId, TransitionError};
use curate_sources::SourceError;
use thiserror::Error;

/// Errors surfaced by console operations.
///
/// Collaborator failures are converted here and never reach the UI raw. A
/// partially failed bulk action is not an error; it is reported through
/// [`crate::BulkActionResult`].
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("network error: {0}")]
    TransientNetwork(#[from] SourceError),
    #[error("invalid transition for {product_id}: {source}")]
    InvalidTransition {
        product_id: ProductId,
        #[source]
        source: TransitionError,
    },
    #[error("a bulk action is already in progress")]
    ActionInProgress,
    #[error("no products selected")]
    EmptySelection,
    #[error("no failed bulk action to retry")]
    NothingToRetry,
    #[error("unknown product {0}")]
    UnknownProduct(ProductId),
    #[error("{action} refused for {product_id}: {reason}")]
    ActionRefused {
        product_id: ProductId,
        action: ProductAction,
        reason: String,
    },
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    #[error("{action} refused for job {job_id}: {reason}")]
    JobRefused {
        job_id: JobId,
        action: JobAction,
        reason: String,
    },
}

impl ConsoleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Classify a failed product mutation.
    pub fn product_action(
        product_id: &ProductId,
        action: ProductAction,
        err: SourceError,
    ) -> Self {
        match err {
            SourceError::NotFound(_) => Self::UnknownProduct(product_id.clone()),
            SourceError::Rejected(reason) => Self::ActionRefused {
                product_id: product_id.clone(),
                action,
                reason,
            },
            other => Self::TransientNetwork(other),
        }
    }

    /// Classify a failed job action.
    pub fn job_action(job_id: &JobId, action: JobAction, err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => Self::UnknownJob(job_id.clone()),
            SourceError::Rejected(reason) => Self::JobRefused {
                job_id: job_id.clone(),
                action,
                reason,
            },
            other => Self::TransientNetwork(other),
        }
    }
}
