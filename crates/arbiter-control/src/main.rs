//! Arbiter control service binary.
//!
//! Runs the decision lifecycle control plane.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbiter_control::api;
use arbiter_control::artifacts::ArtifactStorage;
use arbiter_control::clients::{HttpAccountProvisioner, HttpDeployClient, MemoryVault};
use arbiter_control::config::StoreBackend;
use arbiter_control::fleet::StaticFleetSelector;
use arbiter_control::webhooks::DeliveryPool;
use arbiter_control::{
    ControlConfig, DecisionStore, DeploymentOrchestrator, EventBus, LifecycleManager, MemoryStore,
    PostgresStore, WebhookService, WebhookStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("arbiter_control=info".parse()?),
        )
        .init();

    info!("Arbiter control service starting");

    // Load configuration
    let config = ControlConfig::load()?;
    info!(
        listen = %config.server.listen,
        backend = ?config.database.backend,
        platform = %config.platform.api_url,
        "configuration loaded"
    );

    // Create stores
    let (decisions, webhooks_store): (Arc<dyn DecisionStore>, Arc<dyn WebhookStore>) =
        match config.database.backend {
            StoreBackend::Postgres => {
                let store = Arc::new(
                    PostgresStore::new(&config.database.url, config.database.max_connections)
                        .await?,
                );
                info!(url = %config.database.url, "connected to PostgreSQL");
                (store.clone(), store)
            }
            StoreBackend::Memory => {
                info!("using in-memory store");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

    // Create artifact storage
    let artifacts = Arc::new(ArtifactStorage::new(&config.artifacts)?);
    info!(store_url = %config.artifacts.store_url, "artifact storage initialised");

    // Create event bus and webhook service, then replay persisted
    // registrations into listeners
    let bus = Arc::new(EventBus::new());
    let pool = DeliveryPool::new(&config.webhooks)?;
    let webhooks = Arc::new(WebhookService::new(webhooks_store, bus.clone(), pool));
    webhooks.replay().await?;

    // Create the orchestrator
    let lifecycle = Arc::new(LifecycleManager::new(decisions.clone(), artifacts));
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        lifecycle,
        Arc::new(HttpDeployClient::new(&config.platform)?),
        Arc::new(StaticFleetSelector::new(&config.fleet)),
        Arc::new(MemoryVault::new()),
        Arc::new(HttpAccountProvisioner::new(&config.platform)?),
        bus,
        &config.server.api_base,
    ));

    // Build router
    let app = api::router(api::AppState {
        orchestrator,
        store: decisions,
        webhooks,
    });

    // Start HTTP server
    let listener = TcpListener::bind(&config.server.listen).await?;
    info!(addr = %config.server.listen, "control API listening");

    axum::serve(listener, app).await?;

    Ok(())
}
