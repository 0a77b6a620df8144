#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::Context;
use clap::Parser;
use idle_load_agent::{
    serve, validate_config, AppState, Config, CpuLoadWorker, LoadController, LogNotifier,
    MemoryLoadWorker, Metrics, Overrides, StatusService, SystemSampler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "idle-load-agent",
    about = "Fills idle CPU and memory up to a threshold with synthetic load"
)]
struct Cli {
    /// Config file. Relative paths resolve next to the executable.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// CPU threshold in percent, overrides the config file.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    cpu: Option<u32>,

    /// Memory threshold in percent, overrides the config file.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    mem: Option<u32>,

    /// Controller period in seconds.
    #[arg(long)]
    interval: Option<u64>,

    /// Address of the status surface.
    #[arg(long)]
    bind: Option<String>,

    /// Do not serve /healthz, /status and /metrics.
    #[arg(long)]
    no_status: bool,
}

fn init_tracing() {
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env());
    fmt.json().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let path = Config::find_path(cli.config.as_deref());
    let mut cfg = Config::load(&path)?;
    cfg.apply(&Overrides {
        cpu_threshold: cli.cpu,
        memory_threshold: cli.mem,
        update_interval: cli.interval,
        status_bind: cli.bind,
        disable_status: cli.no_status,
    });
    validate_config(&cfg).context("invalid configuration")?;
    info!(
        config=%path.display(),
        cpu_threshold = cfg.cpu_threshold,
        memory_threshold = cfg.memory_threshold,
        update_interval = cfg.update_interval,
        "starting agent"
    );

    let metrics = Metrics::new()?;
    let cpu = Arc::new(CpuLoadWorker::new());
    let memory = Arc::new(MemoryLoadWorker::new(None));
    let notifier = LogNotifier::new(cfg.notification.enabled, cfg.notification_cooldown())
        .with_metrics(metrics.clone());
    let controller = LoadController::new(
        cfg.thresholds()?,
        cfg.sampling_period(),
        Arc::clone(&cpu),
        Arc::clone(&memory),
        SystemSampler::new(),
        notifier,
    );

    let server = if cfg.status.enabled {
        let state = AppState {
            status: StatusService::new(
                controller.thresholds(),
                Arc::clone(&cpu),
                Arc::clone(&memory),
                controller.status_handle(),
                metrics,
            ),
        };
        let server = serve(&cfg.status.bind, state)
            .with_context(|| format!("bind status surface {}", cfg.status.bind))?;
        let handle = server.handle();
        tokio::spawn(server);
        Some(handle)
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control = tokio::spawn(controller.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    control.await.context("controller task panicked")??;
    if let Some(handle) = server {
        handle.stop(true).await;
    }
    info!("agent stopped");
    Ok(())
}
