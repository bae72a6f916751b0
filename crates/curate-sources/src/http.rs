//! JSON-over-HTTP client for the curation API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use curate_core::{
    ActionOutcome, CurationJob, JobAction, JobFilter, JobId, ProductAction, ProductCounts,
    ProductFilter, ProductId, ProductPage,
};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::{JobStatusSource, ProductStatusSource, SourceError};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub bearer_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    bearer_token: Option<String>,
}

#[derive(Serialize)]
struct ActionBody<'a> {
    action: &'a str,
}

impl HttpBackend {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .with_context(|| format!("parsing curation api url {}", config.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("curation api url {} cannot carry a path", config.base_url);
        }

        Ok(Self {
            client,
            base,
            bearer_token: config.bearer_token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SourceError> {
        let resp = self.authorize(request).send().await?;
        let status = resp.status();
        let url = resp.url().to_string();

        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if matches!(status, StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY) {
                return Err(SourceError::Rejected(rejection_reason(status, body)));
            }
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| SourceError::Decode { url, source })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "detail", alias = "message")]
    error: String,
}

/// The API's `{"error": ...}` message, else the raw body, else the status text.
fn rejection_reason(status: StatusCode, body: String) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("rejected")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn product_query(filter: &ProductFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("page", filter.page.to_string()),
        ("page_size", filter.page_size.to_string()),
    ];
    if let Some(status) = filter.status {
        query.push(("status", status.as_str().to_string()));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        query.push(("search", search.to_string()));
    }
    if let Some(from) = filter.date_from {
        query.push(("date_from", from.to_string()));
    }
    if let Some(to) = filter.date_to {
        query.push(("date_to", to.to_string()));
    }
    query
}

#[async_trait]
impl JobStatusSource for HttpBackend {
    async fn jobs(&self, filter: &JobFilter) -> Result<Vec<CurationJob>, SourceError> {
        let url = self.endpoint(&["curation", "jobs"]);
        let mut request = self.client.get(url);
        if let Some(status) = filter.status {
            request = request.query(&[("status", status.as_str())]);
        }
        let jobs: Vec<CurationJob> = self
            .send_json(request)
            .instrument(info_span!("curation_api", op = "jobs"))
            .await?;
        debug!(count = jobs.len(), "fetched curation jobs");
        Ok(jobs)
    }

    async fn job_action(
        &self,
        id: &JobId,
        action: JobAction,
    ) -> Result<CurationJob, SourceError> {
        let url = self.endpoint(&["curation", "jobs", id.as_str(), "actions"]);
        let request = self.client.post(url).json(&ActionBody {
            action: action.as_str(),
        });
        self.send_json(request)
            .instrument(info_span!(
                "curation_api",
                op = "job_action",
                job_id = %id,
                action = action.as_str()
            ))
            .await
    }
}

#[async_trait]
impl ProductStatusSource for HttpBackend {
    async fn products(&self, filter: &ProductFilter) -> Result<ProductPage, SourceError> {
        let url = self.endpoint(&["curation", "products"]);
        let request = self.client.get(url).query(&product_query(filter));
        let page: ProductPage = self
            .send_json(request)
            .instrument(info_span!("curation_api", op = "products", page = filter.page))
            .await?;
        debug!(items = page.items.len(), total = page.total_count, "fetched products");
        Ok(page)
    }

    async fn product_counts(&self) -> Result<ProductCounts, SourceError> {
        let url = self.endpoint(&["curation", "products", "counts"]);
        self.send_json(self.client.get(url))
            .instrument(info_span!("curation_api", op = "product_counts"))
            .await
    }

    async fn product_action(
        &self,
        id: &ProductId,
        action: ProductAction,
    ) -> Result<ActionOutcome, SourceError> {
        let url = self.endpoint(&["curation", "products", id.as_str(), "actions"]);
        let request = self.client.post(url).json(&ActionBody {
            action: action.as_str(),
        });
        self.send_json(request)
            .instrument(info_span!(
                "curation_api",
                op = "product_action",
                product_id = %id,
                action = action.as_str()
            ))
            .await
    }
}
