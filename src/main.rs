use parksmart::api::{self, ApiState};
use parksmart::broadcast::BroadcastHub;
use parksmart::config;
use parksmart::ingest::Ingestor;
use parksmart::prediction::recency::RecencyWeightedModel;
use parksmart::prediction::{self, PredictionEngine};
use parksmart::recommendation::{RecommendationScorer, RecommendationSettings};
use parksmart::seed;
use parksmart::store::ParkingStore;
use parksmart::store::memory::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, config_path) = config::load_from_env()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = %config_path.display(),
        app = %config.app.name,
        "parksmart starting"
    );

    let store: Arc<dyn ParkingStore> = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::new(config.hub_settings()));
    let model = Arc::new(RecencyWeightedModel::new(config.model_params()));
    let engine = Arc::new(
        PredictionEngine::new(Arc::clone(&store), model, config.prediction_settings())
            .with_publisher(Arc::clone(&hub)),
    );

    if config.seed_reset() {
        seed::reset_and_seed(store.as_ref(), SystemTime::now())?;
    } else if config.seed_demo() && store.is_empty()? {
        seed::seed_demo(store.as_ref(), SystemTime::now())?;
    }
    match engine.refresh_all() {
        Ok(report) => tracing::info!(
            refreshed = report.refreshed,
            failed = report.failures.len(),
            "Initial predictions computed"
        ),
        Err(err) => tracing::warn!(error = %err, "Initial prediction pass failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let delivery = Arc::clone(&hub).spawn_delivery_loop(shutdown_rx.clone());
    let refresher =
        prediction::spawn_refresh_task(Arc::clone(&engine), config.refresh_interval(), shutdown_rx);

    let state = ApiState {
        app_name: Arc::from(config.app.name.as_str()),
        store: Arc::clone(&store),
        ingestor: Arc::new(Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::clone(&hub),
            config.slot_defaults(),
            config.refresh_scope(),
        )),
        scorer: Arc::new(RecommendationScorer::new(
            Arc::clone(&store),
            RecommendationSettings::default(),
        )),
        hub,
    };

    let app = api::router(state);
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(delivery, refresher);
    tracing::info!("parksmart stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
