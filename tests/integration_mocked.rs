/// Integration tests with mocked feeds and sink
/// Exercises fetch/retry, the ingestion pass and signed export end to end
use rust_funnel_etl::core::errors::AppError;
use rust_funnel_etl::core::models::{parse_date, AdsFeedResponse, EnrichedMetric};
use rust_funnel_etl::core::repository::{InMemoryRepository, MetricRepository};
use rust_funnel_etl::core::services::{ExportOutcome, PipelineService};
use rust_funnel_etl::integrations::exporter::{sign_payload, Exporter, SIGNATURE_HEADER};
use rust_funnel_etl::integrations::feed_client::{FeedClient, RetryPolicy};
use rust_funnel_etl::integrations::ingestion::Ingestor;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Retry policy with the production shape but millisecond delays
fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    }
}

fn ads_body(cost: f64) -> Value {
    json!({
        "external": {
            "ads": {
                "performance": [
                    {
                        "date": "2025-08-01",
                        "campaign_id": "C-1001",
                        "channel": "google_ads",
                        "clicks": 100,
                        "impressions": 2500,
                        "cost": cost,
                        "utm_campaign": "summer_sale",
                        "utm_source": "google",
                        "utm_medium": "cpc"
                    },
                    {
                        "date": "2025-07-30",
                        "campaign_id": "C-0990",
                        "channel": "meta_ads",
                        "clicks": 40,
                        "impressions": 900,
                        "cost": 20.0,
                        "utm_campaign": "back_to_school",
                        "utm_source": "facebook",
                        "utm_medium": "paid_social"
                    }
                ]
            }
        }
    })
}

fn crm_body() -> Value {
    json!({
        "external": {
            "crm": {
                "opportunities": [
                    {
                        "opportunity_id": "O-9001",
                        "contact_email": "ana@example.com",
                        "stage": "closed_won",
                        "amount": 750.0,
                        "created_at": "2025-08-01T14:00:00Z",
                        "utm_campaign": "Summer_Sale",
                        "utm_source": " google ",
                        "utm_medium": "CPC"
                    },
                    {
                        "opportunity_id": "O-9002",
                        "contact_email": "bruno@example.com",
                        "stage": "closed_lost",
                        "amount": 250.0,
                        "created_at": "2025-07-29T09:00:00Z",
                        "utm_campaign": "summer_sale",
                        "utm_source": "google",
                        "utm_medium": "cpc"
                    }
                ]
            }
        }
    })
}

async fn mount_ok(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn pipeline(
    server: &MockServer,
    sink_url: Option<String>,
) -> (PipelineService, Arc<InMemoryRepository>) {
    let client = FeedClient::new(fast_policy()).unwrap();
    let ingestor = Ingestor::new(
        format!("{}/ads", server.uri()),
        format!("{}/crm", server.uri()),
        client,
    );
    let repository = Arc::new(InMemoryRepository::new());
    let exporter = Exporter::new(sink_url, "test_secret".to_string()).unwrap();

    let service = PipelineService::new(ingestor, repository.clone(), exporter);
    (service, repository)
}

// ============ Feed client ============

#[tokio::test]
async fn test_fetch_decodes_envelope() {
    let mock_server = MockServer::start().await;
    mount_ok(&mock_server, "/ads", ads_body(50.0)).await;

    let client = FeedClient::new(fast_policy()).unwrap();
    let response: AdsFeedResponse = client
        .fetch(&format!("{}/ads", mock_server.uri()))
        .await
        .unwrap();

    let records = response.into_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].campaign_id, "C-1001");
}

#[tokio::test]
async fn test_fetch_retries_transient_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ads"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_ok(&mock_server, "/ads", ads_body(50.0)).await;

    let client = FeedClient::new(fast_policy()).unwrap();
    let result = client
        .fetch::<AdsFeedResponse>(&format!("{}/ads", mock_server.uri()))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_fetch_retries_undecodable_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    mount_ok(&mock_server, "/crm", crm_body()).await;

    let client = FeedClient::new(fast_policy()).unwrap();
    let result = client
        .fetch::<Value>(&format!("{}/crm", mock_server.uri()))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_fetch_gives_up_after_budget() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ads"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = FeedClient::new(fast_policy()).unwrap();
    let result = client
        .fetch::<AdsFeedResponse>(&format!("{}/ads", mock_server.uri()))
        .await;

    match result {
        Err(AppError::FetchError {
            attempts, cause, ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(cause.contains("500"), "unexpected cause: {}", cause);
        }
        other => panic!("expected FetchError, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_fetch_backoff_waits_between_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let policy = RetryPolicy {
        base_delay: Duration::from_millis(20),
        ..fast_policy()
    };
    let client = FeedClient::new(policy).unwrap();

    let started = Instant::now();
    let _ = client.fetch::<Value>(&mock_server.uri()).await;

    // 20ms * 2^1 + 20ms * 2^2
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn test_fetch_retries_after_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ads"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ads_body(50.0))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_ok(&mock_server, "/ads", ads_body(50.0)).await;

    let policy = RetryPolicy {
        timeout: Duration::from_millis(200),
        ..fast_policy()
    };
    let client = FeedClient::new(policy).unwrap();

    let started = Instant::now();
    let response = client
        .fetch::<AdsFeedResponse>(&format!("{}/ads", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(response.into_records().len(), 2);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_fetch_retries_refused_connection() {
    // Bind then drop to get a local port with nothing listening
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let client = FeedClient::new(fast_policy()).unwrap();
    let result = client
        .fetch::<AdsFeedResponse>(&format!("http://127.0.0.1:{}/ads", port))
        .await;

    match result {
        Err(AppError::FetchError { attempts, cause, .. }) => {
            assert_eq!(attempts, 3);
            assert!(cause.contains("request failed"), "unexpected cause: {}", cause);
        }
        other => panic!("expected FetchError, got {:?}", other.map(|_| ())),
    }
}

// ============ Ingestion pass ============

#[tokio::test]
async fn test_null_fields_do_not_fail_the_pass() {
    let mock_server = MockServer::start().await;
    mount_ok(
        &mock_server,
        "/ads",
        json!({"external": {"ads": {"performance": [
            {"date": "2025-08-01", "campaign_id": "C-1001", "channel": "google_ads",
             "clicks": 100, "impressions": null, "cost": 50.0,
             "utm_campaign": "summer_sale", "utm_source": null, "utm_medium": null},
            {"date": null, "campaign_id": "C-1002", "channel": "google_ads",
             "clicks": null, "cost": null,
             "utm_campaign": null, "utm_source": null, "utm_medium": null}
        ]}}}),
    )
    .await;
    mount_ok(
        &mock_server,
        "/crm",
        json!({"external": {"crm": {"opportunities": [
            {"opportunity_id": "O-1", "contact_email": null, "stage": "closed_won",
             "amount": 300.0, "created_at": "2025-08-01T10:00:00Z",
             "utm_campaign": "Summer_Sale", "utm_source": null, "utm_medium": ""}
        ]}}}),
    )
    .await;

    let (service, repository) = pipeline(&mock_server, None);
    let report = service.run_ingestion(None).await.unwrap();

    // The record with a null date is skipped; the other matches on unknown source/medium
    assert_eq!(report.metrics_saved, 1);
    let all = repository.all().unwrap();
    assert_eq!(all[0].campaign_id, "C-1001");
    assert_eq!(all[0].impressions, 0);
    assert_eq!(all[0].closed_won, 1);
    assert_eq!(all[0].revenue, 300.0);
}

#[tokio::test]
async fn test_ingestion_pass_enriches_and_stores() {
    let mock_server = MockServer::start().await;
    mount_ok(&mock_server, "/ads", ads_body(50.0)).await;
    mount_ok(&mock_server, "/crm", crm_body()).await;

    let (service, repository) = pipeline(&mock_server, None);
    let report = service.run_ingestion(None).await.unwrap();

    assert_eq!(report.ads_fetched, 2);
    assert_eq!(report.opportunities_fetched, 2);
    assert_eq!(report.metrics_saved, 2);

    let summer: Vec<EnrichedMetric> = repository
        .all()
        .unwrap()
        .into_iter()
        .filter(|m| m.campaign_id == "C-1001")
        .collect();
    assert_eq!(summer.len(), 1);
    let metric = &summer[0];
    assert_eq!(metric.leads, 2);
    assert_eq!(metric.opportunities, 2);
    assert_eq!(metric.closed_won, 1);
    assert_eq!(metric.revenue, 750.0);
    assert!((metric.roas - 15.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_ingestion_since_filters_both_feeds() {
    let mock_server = MockServer::start().await;
    mount_ok(&mock_server, "/ads", ads_body(50.0)).await;
    mount_ok(&mock_server, "/crm", crm_body()).await;

    let (service, repository) = pipeline(&mock_server, None);
    let report = service
        .run_ingestion(parse_date("2025-08-01"))
        .await
        .unwrap();

    assert_eq!(report.ads_fetched, 1);
    assert_eq!(report.opportunities_fetched, 1);

    let all = repository.all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].leads, 1);
    assert_eq!(all[0].cvr_opp_to_won, 1.0);
}

#[tokio::test]
async fn test_crm_failure_discards_whole_pass() {
    let mock_server = MockServer::start().await;
    mount_ok(&mock_server, "/ads", ads_body(50.0)).await;
    Mock::given(method("GET"))
        .and(path("/crm"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (service, repository) = pipeline(&mock_server, None);
    let err = service.run_ingestion(None).await.unwrap_err();

    assert!(matches!(err, AppError::IngestionFailure { feed: "crm", .. }));
    assert!(repository.is_empty());
}

#[tokio::test]
async fn test_ads_error_takes_priority() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let (service, _) = pipeline(&mock_server, None);
    let err = service.run_ingestion(None).await.unwrap_err();

    assert!(matches!(err, AppError::IngestionFailure { feed: "ads", .. }));
}

#[tokio::test]
async fn test_fast_failure_waits_for_other_feed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crm"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(crm_body())
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = FeedClient::new(RetryPolicy {
        max_attempts: 1,
        ..fast_policy()
    })
    .unwrap();
    let ingestor = Ingestor::new(
        format!("{}/ads", mock_server.uri()),
        format!("{}/crm", mock_server.uri()),
        client,
    );

    let started = Instant::now();
    let result = ingestor.fetch_data(None).await;

    assert!(result.is_err());
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_empty_ads_feed_is_precondition_failure() {
    let mock_server = MockServer::start().await;
    mount_ok(
        &mock_server,
        "/ads",
        json!({"external": {"ads": {"performance": []}}}),
    )
    .await;
    mount_ok(&mock_server, "/crm", crm_body()).await;

    let (service, repository) = pipeline(&mock_server, None);
    let err = service.run_ingestion(None).await.unwrap_err();

    assert!(matches!(err, AppError::EnrichmentPrecondition(_)));
    assert!(repository.is_empty());
}

#[tokio::test]
async fn test_second_pass_overwrites_first() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ads_body(50.0)))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_ok(&mock_server, "/ads", ads_body(80.0)).await;
    mount_ok(&mock_server, "/crm", crm_body()).await;

    let (service, repository) = pipeline(&mock_server, None);
    service.run_ingestion(None).await.unwrap();
    service.run_ingestion(None).await.unwrap();

    let summer: Vec<EnrichedMetric> = repository
        .all()
        .unwrap()
        .into_iter()
        .filter(|m| m.campaign_id == "C-1001")
        .collect();
    assert_eq!(repository.len(), 2);
    assert_eq!(summer.len(), 1);
    assert_eq!(summer[0].cost, 80.0);
}

// ============ Export ============

#[tokio::test]
async fn test_export_signs_exact_body() {
    let feeds = MockServer::start().await;
    mount_ok(&feeds, "/ads", ads_body(50.0)).await;
    mount_ok(&feeds, "/crm", crm_body()).await;

    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sink"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&sink)
        .await;

    let (service, _) = pipeline(&feeds, Some(format!("{}/sink", sink.uri())));
    service.run_ingestion(None).await.unwrap();

    let outcome = service
        .export_for_date(parse_date("2025-08-01").unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, ExportOutcome::Exported { count: 1, .. }));

    let requests = sink.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert_eq!(signature, sign_payload("test_secret", &request.body).unwrap());

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body[0]["CampaignID"], "C-1001");
    assert_eq!(body[0]["Date"], "2025-08-01T00:00:00Z");
}

#[tokio::test]
async fn test_export_non_200_is_failure() {
    let feeds = MockServer::start().await;
    mount_ok(&feeds, "/ads", ads_body(50.0)).await;
    mount_ok(&feeds, "/crm", crm_body()).await;

    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&sink)
        .await;

    let (service, _) = pipeline(&feeds, Some(sink.uri()));
    service.run_ingestion(None).await.unwrap();

    let err = service
        .export_for_date(parse_date("2025-08-01").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err.root(), AppError::ExportFailure(_)));
}

#[tokio::test]
async fn test_export_skips_sink_when_date_has_no_metrics() {
    let feeds = MockServer::start().await;
    mount_ok(&feeds, "/ads", ads_body(50.0)).await;
    mount_ok(&feeds, "/crm", crm_body()).await;

    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&sink)
        .await;

    let (service, _) = pipeline(&feeds, Some(sink.uri()));
    service.run_ingestion(None).await.unwrap();

    let outcome = service
        .export_for_date(parse_date("2024-01-01").unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, ExportOutcome::NoMetrics);
}
