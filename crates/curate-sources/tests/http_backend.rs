use std::time::Duration;

use curate_core::{
    CurationStatus, JobAction, JobFilter, JobId, JobStatus, ProductAction, ProductFilter,
    ProductId,
};
use curate_sources::{
    HttpBackend, HttpClientConfig, JobStatusSource, ProductStatusSource, SourceError,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer, token: Option<&str>) -> HttpBackend {
    HttpBackend::new(HttpClientConfig {
        base_url: format!("{}/api", server.uri()),
        timeout: Duration::from_secs(5),
        user_agent: Some("curate-test".into()),
        bearer_token: token.map(str::to_string),
    })
    .expect("backend")
}

#[tokio::test]
async fn fetches_products_with_filter_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/curation/products"))
        .and(query_param("status", "processing"))
        .and(query_param("page", "1"))
        .and(query_param("page_size", "20"))
        .and(query_param("search", "lamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "p-1",
                "title": "Desk Lamp",
                "curation_status": "processing",
                "confidence_score": 72,
                "source": {"marketplace": "amazon", "scraped_at": "2026-04-01T10:00:00Z"}
            }],
            "total_count": 41
        })))
        .mount(&server)
        .await;

    let page = backend(&server, None)
        .products(&ProductFilter {
            status: Some(CurationStatus::Processing),
            search: Some("lamp".into()),
            ..ProductFilter::default()
        })
        .await
        .expect("products");

    assert_eq!(page.total_count, 41);
    assert_eq!(page.items[0].id, ProductId::new("p-1"));
    assert_eq!(page.items[0].confidence_score, Some(72));
}

#[tokio::test]
async fn sends_bearer_token_and_action_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/curation/products/p-7/actions"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_json(json!({"action": "send_to_pim"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "no PIM mapping"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = backend(&server, Some("s3cret"))
        .product_action(&ProductId::new("p-7"), ProductAction::SendToPim)
        .await
        .expect("action");

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("no PIM mapping"));
}

#[tokio::test]
async fn maps_server_errors_to_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/curation/products/counts"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = backend(&server, None).product_counts().await.unwrap_err();
    match err {
        SourceError::HttpStatus { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_json_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/curation/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("[{\"id\":", "application/json"))
        .mount(&server)
        .await;

    let err = backend(&server, None)
        .jobs(&JobFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Decode { .. }));
}

#[tokio::test]
async fn job_listing_and_actions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/curation/jobs"))
        .and(query_param("status", "running"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "job-3",
            "type": "ai_curation",
            "status": "running",
            "processed_count": 12,
            "success_count": 10,
            "error_count": 2,
            "total_count": 50
        }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/curation/jobs/job-3/actions"))
        .and(body_json(json!({"action": "cancel"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "job-3",
            "type": "ai_curation",
            "status": "cancelled"
        })))
        .mount(&server)
        .await;

    let backend = backend(&server, None);
    let jobs = backend
        .jobs(&JobFilter {
            status: Some(JobStatus::Running),
        })
        .await
        .expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].is_active());
    assert!(jobs[0].check_counters().is_ok());

    let cancelled = backend
        .job_action(&JobId::new("job-3"), JobAction::Cancel)
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn missing_job_is_not_found_and_conflict_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/curation/jobs/job-gone/actions"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such job"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/curation/jobs/job-3/actions"))
        .and(body_json(json!({"action": "start"})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "job already running"
        })))
        .mount(&server)
        .await;

    let backend = backend(&server, None);
    let err = backend
        .job_action(&JobId::new("job-gone"), JobAction::Cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::NotFound(ref url) if url.ends_with("/job-gone/actions")));

    let err = backend
        .job_action(&JobId::new("job-3"), JobAction::Start)
        .await
        .unwrap_err();
    match err {
        SourceError::Rejected(reason) => assert_eq!(reason, "job already running"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn refused_product_action_is_rejected_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/curation/products/p-1/actions"))
        .respond_with(ResponseTemplate::new(422).set_body_string("product is not curated"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/curation/products/p-2/actions"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "detail": "status changed concurrently"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/curation/products/p-9/actions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = backend(&server, None);
    let err = backend
        .product_action(&ProductId::new("p-1"), ProductAction::SendToPim)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Rejected(ref reason) if reason == "product is not curated"));

    let err = backend
        .product_action(&ProductId::new("p-2"), ProductAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SourceError::Rejected(ref reason) if reason == "status changed concurrently"
    ));

    let err = backend
        .product_action(&ProductId::new("p-9"), ProductAction::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)));
}
