//! Audio Player (tonebridge-ap) - Main entry point
//!
//! Receives encoded audio chunks over HTTP and plays them back-to-back on the
//! output device, gap-free and in arrival order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tonebridge_ap::api::{self, AppContext};
use tonebridge_ap::audio::CpalOutput;
use tonebridge_ap::config::{Config, Overrides};
use tonebridge_ap::playback::SchedulerDriver;
use tonebridge_ap::Pipeline;
use tonebridge_common::config::{OutputBackend, CONFIG_ENV_VAR};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for tonebridge-ap
#[derive(Parser, Debug)]
#[command(name = "tonebridge-ap")]
#[command(about = "Gap-free chunked audio player")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "TONEBRIDGE_PORT")]
    port: Option<u16>,

    /// Configuration file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Output backend: cpal or null
    #[arg(long, env = "TONEBRIDGE_BACKEND")]
    backend: Option<OutputBackend>,

    /// Output device name (default device if omitted)
    #[arg(long, env = "TONEBRIDGE_DEVICE")]
    device: Option<String>,

    /// Maximum audio scheduled ahead of the clock, in seconds
    #[arg(long)]
    max_lookahead: Option<f64>,

    /// Maximum queued chunks before the oldest is dropped
    #[arg(long)]
    max_queue_depth: Option<usize>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Start streaming immediately instead of waiting for POST /stream/start
    #[arg(long)]
    autostart: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for name in CpalOutput::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let overrides = Overrides {
        config_path: args.config.clone(),
        port: args.port,
        backend: args.backend,
        device: args.device.clone(),
        max_lookahead_secs: args.max_lookahead,
        max_queue_depth: args.max_queue_depth,
        log_level: args.log_level.clone(),
    };
    let config = Config::resolve(&overrides).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "tonebridge_ap={0},tonebridge_common={0},tower_http={0}",
                config.log_level
            )
            .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tonebridge-ap on port {}", config.port);
    info!(
        "Scheduler: lookahead={:.2}s, queue depth={}, poll={}ms",
        config.scheduler.max_lookahead_secs,
        config.scheduler.max_queue_depth,
        config.scheduler.poll_interval_ms
    );

    let pipeline = Pipeline::build(&config.scheduler, &config.output)
        .context("Failed to initialize audio pipeline")?;
    info!("Output: {:?}", pipeline.output);

    let driver = SchedulerDriver::spawn(
        Arc::clone(&pipeline.scheduler),
        config.scheduler.poll_interval(),
    );

    if args.autostart {
        pipeline
            .scheduler
            .start()
            .context("Failed to start stream")?;
    }

    let ctx = AppContext::new(Arc::clone(&pipeline.scheduler), pipeline.output.clone());
    let router = api::create_router(ctx, config.http.max_chunk_bytes);

    let served = api::run(config.port, router, shutdown_signal()).await;

    pipeline.scheduler.stop();
    driver.shutdown().await;

    served.context("Server error")?;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
