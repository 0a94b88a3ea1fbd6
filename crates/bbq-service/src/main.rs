//! BBQ Service - thermometer bridge with HTTP and WebSocket API.
//!
//! Run with: `cargo run -p bbq-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use bbq_core::{Broadcaster, Bus, Device, Pipeline, PipelineMetrics, Thermometer, graph, mailbox};
use bbq_service::{AppState, Config, SensorConfig, StoreSink};
use bbq_store::Store;

/// BBQ Service - streams thermometer readings to storage and web clients.
#[derive(Parser, Debug)]
#[command(name = "bbq-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Advertised thermometer name (overrides config).
    #[arg(short = 'n', long)]
    device_name: Option<String>,

    /// Do not persist measurements.
    #[arg(long)]
    no_store: bool,

    /// Log routing and handshake details.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "bbq_service=debug,bbq_core=debug,tower_http=debug"
    } else {
        "bbq_service=info,bbq_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    run(config).await
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(name) = &args.device_name {
        config.sensor.name = name.clone();
    }
    if args.no_store {
        config.storage.enabled = false;
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let metrics = PipelineMetrics::shared();
    let broadcaster = Arc::new(
        Broadcaster::with_buffer(config.server.observer_buffer).with_metrics(Arc::clone(&metrics)),
    );

    let store = if config.storage.enabled {
        let store = Store::open(&config.storage.path)?;
        Some(Arc::new(Mutex::new(store)))
    } else {
        info!("Storage disabled");
        None
    };

    let mut pipeline = Pipeline::new(Arc::clone(&broadcaster), Arc::clone(&metrics));
    if let Some(store) = &store {
        pipeline = pipeline.with_sink(Arc::new(StoreSink::new(Arc::clone(store))));
    }
    let latest = pipeline.latest();

    let bus = connect_bus()?;
    let device = find_device(bus.as_ref(), &config.sensor).await?;
    info!(
        device = %device.path,
        address = device.address.as_deref().unwrap_or("unknown"),
        "Found thermometer"
    );

    let (tx, rx) = mailbox();
    let tx = tx.with_metrics(Arc::clone(&metrics));
    let session = Thermometer::start(
        bus,
        device,
        tx,
        config.sensor.thermometer_options(Arc::clone(&metrics)),
    )
    .await?;

    let token = CancellationToken::new();
    let pipeline_task = tokio::spawn(pipeline.run(rx, token.clone()));

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::new(config, broadcaster, metrics, latest, store);
    let app = bbq_service::app(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await?;

    token.cancel();
    if let Err(e) = session.close().await {
        warn!(error = %e, "Thermometer did not disconnect cleanly");
    }
    match pipeline_task.await {
        Ok(processed) => info!(processed, "Pipeline stopped"),
        Err(e) => warn!(error = %e, "Pipeline task failed"),
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn connect_bus() -> anyhow::Result<Arc<dyn Bus>> {
    Ok(Arc::new(bbq_core::BluezBus::connect()?))
}

#[cfg(not(target_os = "linux"))]
fn connect_bus() -> anyhow::Result<Arc<dyn Bus>> {
    anyhow::bail!("the BlueZ transport is only available on Linux")
}

/// Discover until a device with the configured name shows up.
async fn find_device(bus: &dyn Bus, sensor: &SensorConfig) -> anyhow::Result<Device> {
    let interval = Duration::from_millis(sensor.resolve_interval_ms);
    for attempt in 1..=sensor.resolve_attempts {
        let snapshot = bus.discover().await?;
        let mut devices = graph::build(&snapshot, &sensor.name)?;
        if devices.len() > 1 {
            warn!(
                count = devices.len(),
                name = %sensor.name,
                "Several devices share the name, using the first"
            );
        }
        if !devices.is_empty() {
            return Ok(devices.remove(0));
        }
        debug!(attempt, name = %sensor.name, "Thermometer not known yet");
        tokio::time::sleep(interval).await;
    }
    anyhow::bail!("no device named '{}' is known to BlueZ", sensor.name)
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
        }
        _ = token.cancelled() => {}
    }
    token.cancel();
}
