use energy_meter::adc::{open_spidev, Mcp3008};
use energy_meter::scheduler::MeterSettings;
use energy_meter::{Accumulator, Config, EnergyStore, FileStore, InfluxSink, MemoryStore, Meter};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        config = %cfg_path,
        channels = ?cfg.adc.channels,
        period_ms = cfg.sampling.period_ms,
        "loaded config"
    );

    // No point sampling without a working bus.
    let spi = open_spidev(&cfg.adc.device, cfg.adc.speed_hz)?;
    info!(device = %cfg.adc.device, speed_hz = cfg.adc.speed_hz, "SPI ready");
    let adc = Mcp3008::new(spi);

    let store: Box<dyn EnergyStore> = match &cfg.state.path {
        Some(path) => Box::new(FileStore::open(path)?),
        None => {
            info!("energy totals kept in memory; they restart at zero");
            Box::new(MemoryStore::new())
        }
    };

    let sink = InfluxSink::new(&cfg.influx)?;
    info!(url = %cfg.influx.url, bucket = %cfg.influx.bucket, "InfluxDB sink configured");

    let mut meter = Meter::new(
        adc,
        sink,
        Accumulator::new(store),
        MeterSettings::from_config(&cfg),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    meter.run(shutdown_rx).await?;

    info!("energy-meter shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
