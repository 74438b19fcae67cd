use rust_funnel_etl::config::Config;
use rust_funnel_etl::exporter::Exporter;
use rust_funnel_etl::feed_client::FeedClient;
use rust_funnel_etl::handlers::{self, AppState};
use rust_funnel_etl::ingestion::Ingestor;
use rust_funnel_etl::repository::InMemoryRepository;
use rust_funnel_etl::services::PipelineService;
use rust_funnel_etl::telemetry;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Prometheus metrics recorder.
/// - Feed client, metric store and sink exporter.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_funnel_etl=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let metrics_handle = telemetry::install_recorder()?;

    let feed_client = FeedClient::new(config.retry_policy())?;
    let ingestor = Ingestor::new(
        config.ads_api_url.clone(),
        config.crm_api_url.clone(),
        feed_client,
    );
    tracing::info!("Feed client initialized ({:?})", config.retry_policy());

    let repository = Arc::new(InMemoryRepository::new());
    tracing::info!("In-memory metric store initialized");

    let exporter = Exporter::new(config.sink_url.clone(), config.sink_secret.clone())?;

    let app_state = Arc::new(AppState {
        config: config.clone(),
        pipeline: PipelineService::new(ingestor, repository, exporter),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Request size limit: 1MB max payload
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            // Rate limiting: 10 req/sec per IP, burst of 20
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Probes and metrics scrape bypass rate limiting
    let app = Router::new()
        .merge(handlers::probe_routes())
        .merge(telemetry::metrics_routes(metrics_handle))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
