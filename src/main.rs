mod action_executor;
mod authorizer;
mod config;
mod config_loader;
mod db;
mod error;
mod job_queue;
mod platform;
mod policy_registry;
mod routes;
mod scan_orchestrator;
mod webhooks;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use action_executor::ActionExecutor;
use authorizer::Authorizer;
use config_loader::ConfigLoader;
use job_queue::{start_daily_scan_schedule, start_worker, Services};
use platform::{GithubAppClient, PlatformClient};
use routes::api_routes;
use scan_orchestrator::ScanOrchestrator;

async fn root() -> &'static str {
    "repo-policy-engine"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast on missing required configuration.
    let _ = config::GITHUB_APP_ID.as_str();
    let _ = config::GITHUB_WEBHOOK_SECRET.as_str();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config::database_url())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(?error, "database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE");
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let client: Arc<dyn PlatformClient> = Arc::new(GithubAppClient::new(
        config::GITHUB_ORG.clone(),
        config::GITHUB_APP_INSTALLATION_ID.clone(),
        config::GITHUB_API_BASE_URL.clone(),
    ));
    let config_loader = Arc::new(ConfigLoader::new());
    let scan_orchestrator = Arc::new(ScanOrchestrator::new(
        pool.clone(),
        client.clone(),
        config_loader.clone(),
    ));
    let action_executor = Arc::new(ActionExecutor::new(pool.clone(), client.clone(), config_loader.clone()));
    let authorizer = Arc::new(Authorizer::new(client.clone(), config_loader.clone()));

    let services = Services {
        pool: pool.clone(),
        client: client.clone(),
        config_loader: config_loader.clone(),
        scan_orchestrator: scan_orchestrator.clone(),
        action_executor: action_executor.clone(),
    };
    let _worker = start_worker(services);
    let _scheduler = start_daily_scan_schedule(pool.clone()).await?;

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(Extension(client.clone()))
        .layer(Extension(config_loader.clone()))
        .layer(Extension(scan_orchestrator.clone()))
        .layer(Extension(action_executor.clone()))
        .layer(Extension(authorizer.clone()));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
