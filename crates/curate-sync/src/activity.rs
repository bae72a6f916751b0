//! Derives the "is anything running" signal from the job source.

use std::sync::Arc;

use curate_core::{CurationJob, JobFilter};
use curate_sources::{JobStatusSource, SourceError};
use tracing::warn;

pub fn has_active_jobs(jobs: &[CurationJob]) -> bool {
    jobs.iter().any(CurationJob::is_active)
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobActivity {
    pub jobs: Vec<CurationJob>,
    pub has_active_jobs: bool,
}

impl JobActivity {
    pub fn from_jobs(jobs: Vec<CurationJob>) -> Self {
        let has_active_jobs = has_active_jobs(&jobs);
        Self {
            jobs,
            has_active_jobs,
        }
    }
}

#[derive(Clone)]
pub struct ActivityDetector {
    jobs: Arc<dyn JobStatusSource>,
}

impl ActivityDetector {
    pub fn new(jobs: Arc<dyn JobStatusSource>) -> Self {
        Self { jobs }
    }

    /// Fetch the job list and recompute activity. Touches no product data.
    pub async fn poll(&self) -> Result<JobActivity, SourceError> {
        let jobs = self.jobs.jobs(&JobFilter::default()).await?;
        for job in &jobs {
            if let Err(violation) = job.check_counters() {
                warn!(job_id = %job.id, %violation, "job counters out of range");
            }
        }
        Ok(JobActivity::from_jobs(jobs))
    }
}
