//! Curation pipeline orchestration: activity detection, adaptive refresh,
//! the curation state store, bulk actions and the console facade.

pub mod activity;
pub mod bulk;
pub mod config;
pub mod console;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod transition;

pub use activity::{has_active_jobs, ActivityDetector, JobActivity};
pub use bulk::{BulkActionCoordinator, BulkActionResult, BulkOutcome, DEFAULT_BULK_CONCURRENCY};
pub use config::ConsoleConfig;
pub use console::{ConsoleContext, CurationConsole};
pub use error::ConsoleError;
pub use notify::{Notification, NotificationLevel, Notifier};
pub use scheduler::{
    compute_interval, CycleReport, RefreshCycle, RefreshIntervals, RefreshOutcome,
    RefreshPolicyState, RefreshScheduler, ToggleOutcome, ACTIVE_INTERVAL, HEARTBEAT_INTERVAL,
    IDLE_INTERVAL,
};
pub use store::{ConsoleState, CurationStore, RefreshSnapshot, RefreshTicket};
pub use transition::apply_transition;

pub const CRATE_NAME: &str = "curate-sync";
