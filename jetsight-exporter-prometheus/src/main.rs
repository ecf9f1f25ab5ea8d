//! Prometheus exporter for Jetson board telemetry.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use jetsight_exporter_prometheus::config::SourceConfig;
use jetsight_exporter_prometheus::{
    ExporterConfig, HttpServer, SysinfoHost, TelemetryCollector, TelemetrySession,
    TelemetrySource,
};

/// How long the HTTP server gets to drain after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Prometheus exporter for Jetson board telemetry.
#[derive(Parser, Debug)]
#[command(name = "jetsight-exporter-prometheus")]
#[command(about = "Export Jetson board telemetry as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP port to listen on [default: 9000] (overrides the config port).
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // CLI overrides
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(port) = args.port {
        config.prometheus.set_port(port)?;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    jetsight_common::init_tracing(&config.logging)?;

    info!("Starting Jetsight Prometheus Exporter");

    let listen_addr = config.prometheus.listen_addr()?;

    // Opening the session is the only fatal telemetry failure
    let session = TelemetrySession::open(
        telemetry_source(&config.source)?,
        Box::new(SysinfoHost::new(&config.system.mount_point)),
        &config.source,
    )
    .await?;
    let session = Arc::new(session);

    let collector = Arc::new(TelemetryCollector::new(
        session.clone(),
        config.prometheus.prefix.clone(),
        config.prometheus.exporter_metrics,
    ));
    let http_server = HttpServer::new(
        collector.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );

    let result = serve(http_server).await;

    // Release the daemon connection on every exit path
    session.close().await;

    // Print final stats
    let stats = collector.stats();
    info!(
        scrapes = stats.scrapes,
        empty_scrapes = stats.empty_scrapes,
        read_failures = stats.read_failures,
        reconnect_attempts = stats.reconnect_attempts,
        successful_reads = session.successful_reads(),
        "Final statistics"
    );

    if let Err(e) = &result {
        error!(error = %e, "Exporter stopped with error");
    } else {
        info!("Exporter stopped");
    }
    result
}

/// Run the HTTP server until a termination signal arrives or it fails.
async fn serve(http_server: HttpServer) -> anyhow::Result<()> {
    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    // Wait for shutdown signal, or for the server to exit on its own
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down...");
        }
        joined = &mut http_task => {
            return match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
    }

    // Signal shutdown
    shutdown_tx.send(true).ok();

    match tokio::time::timeout(SHUTDOWN_GRACE, http_task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
        Err(_) => {
            warn!("HTTP server did not stop within {:?}", SHUTDOWN_GRACE);
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

#[cfg(unix)]
fn telemetry_source(config: &SourceConfig) -> anyhow::Result<Box<dyn TelemetrySource>> {
    use jetsight_exporter_prometheus::SocketSource;

    Ok(Box::new(SocketSource::new(&config.socket_path, config.format)))
}

#[cfg(not(unix))]
fn telemetry_source(config: &SourceConfig) -> anyhow::Result<Box<dyn TelemetrySource>> {
    anyhow::bail!(
        "The telemetry daemon at {} is only reachable over a Unix socket",
        config.socket_path
    )
}
