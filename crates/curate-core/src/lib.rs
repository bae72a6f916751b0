//! Core domain model for the curation console: scraped products, curation jobs,
//! the product lifecycle graph and the query types shared with collaborators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod stats;

pub use stats::{aggregate, ConfidenceTrend, CurationStats, HIGH_REJECTION_THRESHOLD};

pub const CRATE_NAME: &str = "curate-core";

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Opaque product identifier, stable across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle position of a scraped product.
///
/// Valid edges: `pending -> processing`, `processing -> curated | rejected`,
/// `curated -> sent_to_pim`. `rejected` and `sent_to_pim` have no successors
/// reachable from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationStatus {
    Pending,
    Processing,
    Curated,
    Rejected,
    SentToPim,
}

impl CurationStatus {
    pub const ALL: [CurationStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Curated,
        Self::Rejected,
        Self::SentToPim,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Curated => "curated",
            Self::Rejected => "rejected",
            Self::SentToPim => "sent_to_pim",
        }
    }

    pub fn successors(self) -> &'static [CurationStatus] {
        match self {
            Self::Pending => &[Self::Processing],
            Self::Processing => &[Self::Curated, Self::Rejected],
            Self::Curated => &[Self::SentToPim],
            Self::Rejected | Self::SentToPim => &[],
        }
    }

    pub fn can_transition_to(self, target: CurationStatus) -> bool {
        self.successors().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for CurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("curation status", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move product from {from} to {to}")]
pub struct TransitionError {
    pub from: CurationStatus,
    pub to: CurationStatus,
}

/// Pure validation step of a status change; performs no I/O. Returns the
/// wire action that carries the change.
pub fn validate_transition(
    from: CurationStatus,
    to: CurationStatus,
) -> Result<ProductAction, TransitionError> {
    match ProductAction::for_target(to) {
        Some(action) if from.can_transition_to(to) => Ok(action),
        _ => Err(TransitionError { from, to }),
    }
}

/// Read-only provenance of a scraped product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub marketplace: String,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedProduct {
    pub id: ProductId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub curation_status: CurationStatus,
    #[serde(default, deserialize_with = "deserialize_confidence")]
    pub confidence_score: Option<u8>,
    pub source: SourceMetadata,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.map(|score| score.clamp(0.0, 100.0).round() as u8))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scrape,
    AiCuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Background scrape or AI-curation run as reported by the job source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationJob {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobCounterViolation {
    #[error("processed {processed} exceeds total {total}")]
    ProcessedExceedsTotal { processed: u64, total: u64 },
    #[error("success {success} + errors {errors} exceeds processed {processed}")]
    OutcomesExceedProcessed {
        success: u64,
        errors: u64,
        processed: u64,
    },
}

impl CurationJob {
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fraction of items processed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        (self.processed_count as f64 / self.total_count as f64).clamp(0.0, 1.0)
    }

    pub fn check_counters(&self) -> Result<(), JobCounterViolation> {
        if self.processed_count > self.total_count {
            return Err(JobCounterViolation::ProcessedExceedsTotal {
                processed: self.processed_count,
                total: self.total_count,
            });
        }
        if self.success_count.saturating_add(self.error_count) > self.processed_count {
            return Err(JobCounterViolation::OutcomesExceedProcessed {
                success: self.success_count,
                errors: self.error_count,
                processed: self.processed_count,
            });
        }
        Ok(())
    }
}

/// Aggregate counts reported by the product source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductCounts {
    pub pending: u64,
    pub processing: u64,
    pub curated: u64,
    pub rejected: u64,
    pub sent_to_pim: u64,
    pub total: u64,
    #[serde(default)]
    pub today_curated: u64,
    #[serde(default)]
    pub week_curated: u64,
    #[serde(default)]
    pub month_curated: u64,
    #[serde(default)]
    pub avg_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
}

/// Query predicate for the product listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default)]
    pub status: Option<CurationStatus>,
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            date_from: None,
            date_to: None,
        }
    }
}

impl ProductFilter {
    pub fn matches(&self, product: &ScrapedProduct) -> bool {
        if let Some(status) = self.status {
            if product.curation_status != status {
                return false;
            }
        }
        if let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let haystack = format!(
                "{} {} {}",
                product.title,
                product.brand.as_deref().unwrap_or_default(),
                product.source.marketplace
            )
            .to_lowercase();
            if !haystack.contains(&needle) {
                return false;
            }
        }
        let scraped_on = product.source.scraped_at.date_naive();
        if self.date_from.is_some_and(|from| scraped_on < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| scraped_on > to) {
            return false;
        }
        true
    }
}

/// Partial update applied by `set_filters`; `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterPatch {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub search: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub date_from: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub date_to: Option<Option<NaiveDate>>,
}

// A present `null` clears the field; an absent key leaves it untouched.
fn explicit_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl FilterPatch {
    pub fn apply_to(&self, filter: &mut ProductFilter) {
        if let Some(page) = self.page {
            filter.page = page.max(1);
        }
        if let Some(page_size) = self.page_size {
            filter.page_size = page_size.max(1);
        }
        if let Some(search) = &self.search {
            filter.search = search.clone().filter(|s| !s.trim().is_empty());
        }
        if let Some(date_from) = self.date_from {
            filter.date_from = date_from;
        }
        if let Some(date_to) = self.date_to {
            filter.date_to = date_to;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductPage {
    pub items: Vec<ScrapedProduct>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationTab {
    #[default]
    All,
    Pending,
    Processing,
    Curated,
    Rejected,
    SentToPim,
}

impl CurationTab {
    pub fn status(self) -> Option<CurationStatus> {
        match self {
            Self::All => None,
            Self::Pending => Some(CurationStatus::Pending),
            Self::Processing => Some(CurationStatus::Processing),
            Self::Curated => Some(CurationStatus::Curated),
            Self::Rejected => Some(CurationStatus::Rejected),
            Self::SentToPim => Some(CurationStatus::SentToPim),
        }
    }
}

impl FromStr for CurationTab {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        let status: CurationStatus = s.parse().map_err(|_| ParseEnumError::new("tab", s))?;
        Ok(match status {
            CurationStatus::Pending => Self::Pending,
            CurationStatus::Processing => Self::Processing,
            CurationStatus::Curated => Self::Curated,
            CurationStatus::Rejected => Self::Rejected,
            CurationStatus::SentToPim => Self::SentToPim,
        })
    }
}

/// Single-item mutation understood by the product source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductAction {
    Process,
    Approve,
    Reject,
    SendToPim,
    Delete,
}

impl ProductAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::SendToPim => "send_to_pim",
            Self::Delete => "delete",
        }
    }

    /// Status a successful action leaves the product in; `None` for deletion.
    pub fn target_status(self) -> Option<CurationStatus> {
        match self {
            Self::Process => Some(CurationStatus::Processing),
            Self::Approve => Some(CurationStatus::Curated),
            Self::Reject => Some(CurationStatus::Rejected),
            Self::SendToPim => Some(CurationStatus::SentToPim),
            Self::Delete => None,
        }
    }

    pub fn for_target(status: CurationStatus) -> Option<Self> {
        match status {
            CurationStatus::Pending => None,
            CurationStatus::Processing => Some(Self::Process),
            CurationStatus::Curated => Some(Self::Approve),
            CurationStatus::Rejected => Some(Self::Reject),
            CurationStatus::SentToPim => Some(Self::SendToPim),
        }
    }
}

/// Actions offered to a multi-product selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Approve,
    Reject,
    SendToPim,
    Delete,
}

impl BulkAction {
    pub fn as_str(self) -> &'static str {
        ProductAction::from(self).as_str()
    }
}

impl fmt::Display for ProductAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BulkAction> for ProductAction {
    fn from(action: BulkAction) -> Self {
        match action {
            BulkAction::Approve => Self::Approve,
            BulkAction::Reject => Self::Reject,
            BulkAction::SendToPim => Self::SendToPim,
            BulkAction::Delete => Self::Delete,
        }
    }
}

impl FromStr for BulkAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "send_to_pim" => Ok(Self::SendToPim),
            "delete" => Ok(Self::Delete),
            other => Err(ParseEnumError::new("bulk action", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Start,
    Cancel,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "cancel" => Ok(Self::Cancel),
            other => Err(ParseEnumError::new("job action", other)),
        }
    }
}

/// Reply of the single-item mutation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}
