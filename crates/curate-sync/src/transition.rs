use curate_core::{CurationStatus, ProductId};
use curate_sources::ProductStatusSource;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ConsoleError;
use crate::store::CurationStore;

/// Move one product to `target`: validate locally, apply optimistically, call
/// the product source, then commit or roll back.
///
/// A move that is not an edge of the lifecycle graph fails with
/// [`ConsoleError::InvalidTransition`] before any network call. The store lock
/// is released while the source is being called.
pub async fn apply_transition(
    store: &Mutex<CurationStore>,
    products: &dyn ProductStatusSource,
    product_id: &ProductId,
    target: CurationStatus,
) -> Result<(), ConsoleError> {
    let pending = store.lock().await.begin_transition(product_id, target)?;
    let action = pending.action;

    let response = products.product_action(product_id, action).await;

    let mut store = store.lock().await;
    match response {
        Ok(outcome) if outcome.success => {
            store.commit_transition(&pending);
            debug!(%product_id, from = %pending.previous, to = %target, "transition committed");
            Ok(())
        }
        Ok(outcome) => {
            store.rollback_transition(&pending);
            let reason = outcome
                .error
                .unwrap_or_else(|| "refused by server".to_string());
            warn!(%product_id, action = action.as_str(), %reason, "transition refused");
            Err(ConsoleError::ActionRefused {
                product_id: product_id.clone(),
                action,
                reason,
            })
        }
        Err(err) => {
            let reverted = store.rollback_transition(&pending);
            let err = ConsoleError::product_action(product_id, action, err);
            warn!(
                %product_id,
                action = action.as_str(),
                error = %err,
                reverted,
                "transition failed"
            );
            Err(err)
        }
    }
}
