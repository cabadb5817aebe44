use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use sitewatch_core::SitewatchConfig;
use sitewatch_mqtt::MqttHub;
use sitewatch_scheduler::{
    BillingHandler, BillingJob, CalculationHandler, ConfigStore, ConfigurationPoller, CycleDeps,
    LocationStatusUpdater, LoggingHandler, LoggingJob, ManagedPoller, PowerAnalyzerJob,
};
use sitewatch_store::SqliteStore;

mod app;
mod http;

#[derive(Parser, Debug)]
#[command(name = "sitewatch-gateway")]
#[command(about = "Reload-aware telemetry pollers with an HTTP control surface")]
#[command(version)]
struct Args {
    /// Path to sitewatch.toml (falls back to SITEWATCH_CONFIG, then ~/.sitewatch/sitewatch.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sitewatch_gateway=info,sitewatch_scheduler=info,tower_http=info".into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config > SITEWATCH_CONFIG env > ~/.sitewatch/sitewatch.toml
    let config_path = args
        .config
        .or_else(|| std::env::var("SITEWATCH_CONFIG").ok());
    let config = SitewatchConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        SitewatchConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    sitewatch_store::init_db(&db)?;
    info!("database migrations complete");

    // each subsystem gets its own connection
    let configs = Arc::new(SqliteStore::new(db));
    let results = Arc::new(SqliteStore::new(rusqlite::Connection::open(&db_path)?));
    let locations_db = Arc::new(SqliteStore::new(rusqlite::Connection::open(&db_path)?));

    let mqtt = Arc::new(MqttHub::connect(&config.mqtt));

    let deps = CycleDeps {
        source: mqtt.clone(),
        sink: results,
        value_timeout: Duration::from_millis(config.scheduler.value_timeout_ms),
    };
    let pollers = build_pollers(&config, &configs, deps);

    let locations = config.scheduler.location.enabled.then(|| {
        Arc::new(LocationStatusUpdater::new(
            locations_db,
            mqtt.clone(),
            config.scheduler.location.freshness_minutes,
        ))
    });

    // first initialization runs in the background; HTTP comes up immediately
    for poller in &pollers {
        let poller = Arc::clone(poller);
        tokio::spawn(async move {
            if let Err(e) = poller.ensure_initialized().await {
                warn!(service = poller.service(), error = %e, "initial poller start failed");
            }
        });
    }
    if let Some(updater) = &locations {
        updater.start(config.scheduler.location.interval_minutes);
    }

    let state = Arc::new(app::AppState::new(config, pollers, locations));
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Sitewatch gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for poller in state.pollers.values() {
        poller.shutdown().await;
    }
    if let Some(updater) = &state.locations {
        updater.stop();
    }
    mqtt.shutdown().await;
    info!("Sitewatch gateway stopped");
    Ok(())
}

/// One poller per enabled service, all reading from the same config store.
fn build_pollers(
    config: &SitewatchConfig,
    store: &Arc<SqliteStore>,
    deps: CycleDeps,
) -> Vec<Arc<dyn ManagedPoller>> {
    let sched = &config.scheduler;
    let debounce = Duration::from_millis(sched.reload_debounce_ms);
    let mut pollers: Vec<Arc<dyn ManagedPoller>> = Vec::new();

    if sched.logging.enabled {
        let jobs: Arc<dyn ConfigStore<LoggingJob>> = store.clone();
        let handler = LoggingHandler::new(jobs, deps.clone(), sched.logging.interval_minutes);
        pollers.push(Arc::new(ConfigurationPoller::new(handler, debounce)));
    }
    if sched.billing.enabled {
        let jobs: Arc<dyn ConfigStore<BillingJob>> = store.clone();
        let handler = BillingHandler::new(jobs, deps.clone(), sched.billing.interval_minutes);
        pollers.push(Arc::new(ConfigurationPoller::new(handler, debounce)));
    }
    if sched.calculation.enabled {
        let jobs: Arc<dyn ConfigStore<PowerAnalyzerJob>> = store.clone();
        let handler = CalculationHandler::new(jobs, deps, sched.calculation.interval_minutes);
        pollers.push(Arc::new(ConfigurationPoller::new(handler, debounce)));
    }

    info!(enabled = pollers.len(), "pollers built");
    pollers
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
