//! Applies one action to a selection of products.
//!
//! Each item is attempted independently with bounded concurrency; nothing is
//! short-circuited and the aggregated result is order independent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use curate_core::{BulkAction, ProductAction, ProductId};
use curate_sources::ProductStatusSource;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ConsoleError;
use crate::store::CurationStore;
use crate::transition::apply_transition;

pub const DEFAULT_BULK_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkActionResult {
    pub action: BulkAction,
    pub succeeded: BTreeSet<ProductId>,
    /// Failed ids with the reason reported for each.
    pub failed: BTreeMap<ProductId, String>,
    pub total_requested: usize,
}

impl BulkActionResult {
    pub fn outcome(&self) -> BulkOutcome {
        if self.failed.is_empty() {
            BulkOutcome::Success
        } else if self.succeeded.is_empty() {
            BulkOutcome::Failed
        } else {
            BulkOutcome::Partial
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded.len() + self.failed.len() == self.total_requested
            && self.failed.keys().all(|id| !self.succeeded.contains(id))
    }

    pub fn summary(&self) -> String {
        let verb = self.action.as_str();
        match self.outcome() {
            BulkOutcome::Success => format!("{verb}: {} products succeeded", self.succeeded.len()),
            BulkOutcome::Partial => format!(
                "{verb}: {} succeeded, {} failed",
                self.succeeded.len(),
                self.failed.len()
            ),
            BulkOutcome::Failed => format!("{verb}: all {} products failed", self.failed.len()),
        }
    }
}

struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct BulkActionCoordinator {
    concurrency: usize,
    in_progress: AtomicBool,
}

impl Default for BulkActionCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_BULK_CONCURRENCY)
    }
}

impl BulkActionCoordinator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run `action` over `product_ids`.
    ///
    /// Status actions go through the validated, optimistic transition path so
    /// an item whose local status forbids the move fails without a network
    /// call. Deletion calls the product source directly. Selection
    /// reconciliation is left to the caller.
    pub async fn execute(
        &self,
        store: &Mutex<CurationStore>,
        products: &dyn ProductStatusSource,
        action: BulkAction,
        product_ids: impl IntoIterator<Item = ProductId>,
    ) -> Result<BulkActionResult, ConsoleError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConsoleError::ActionInProgress);
        }
        let _guard = InProgressGuard(&self.in_progress);

        let ids: BTreeSet<ProductId> = product_ids.into_iter().collect();
        if ids.is_empty() {
            return Err(ConsoleError::EmptySelection);
        }
        let total_requested = ids.len();
        info!(action = action.as_str(), total_requested, "bulk action started");

        let outcomes: Vec<(ProductId, Result<(), ConsoleError>)> = stream::iter(ids)
            .map(|id| async move {
                let result = run_item(store, products, action, &id).await;
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut result = BulkActionResult {
            action,
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            total_requested,
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    result.succeeded.insert(id);
                }
                Err(err) => {
                    warn!(
                        product_id = %id,
                        action = action.as_str(),
                        error = %err,
                        "bulk item failed"
                    );
                    result.failed.insert(id, err.to_string());
                }
            }
        }

        info!(
            action = action.as_str(),
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "bulk action finished"
        );
        Ok(result)
    }
}

async fn run_item(
    store: &Mutex<CurationStore>,
    products: &dyn ProductStatusSource,
    action: BulkAction,
    id: &ProductId,
) -> Result<(), ConsoleError> {
    let action = ProductAction::from(action);
    match action.target_status() {
        Some(target) => apply_transition(store, products, id, target).await,
        None => {
            let outcome = products
                .product_action(id, action)
                .await
                .map_err(|err| ConsoleError::product_action(id, action, err))?;
            if !outcome.success {
                return Err(ConsoleError::ActionRefused {
                    product_id: id.clone(),
                    action,
                    reason: outcome.error.unwrap_or_else(|| "refused by server".to_string()),
                });
            }
            store.lock().await.remove_product(id);
            Ok(())
        }
    }
}
