mod activity;
mod config;
mod model;
mod monitor;
mod probe;
mod registry;
mod report;
mod ring;
mod store;
mod web;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitor::Scheduler;
use probe::Prober;
use report::{GeminiReporter, ReportBoard};
use store::MonitorStore;
use web::AppState;

#[derive(Parser, Debug)]
#[command(name = "curlguard", version, about = "HTTP uptime monitor with a live dashboard API")]
struct Args {
    /// Working directory to switch to before reading the config
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Path to the JSON config file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("Failed to change directory to {}", dir.display()))?;
    }
    config::init_config_path(args.config);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "curlguard=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load_config().context("Failed to load configuration")?;

    // 1. store, seeded from config
    let store = MonitorStore::new().with_operator_log(cfg.log_operator_actions);
    for input in cfg.monitors.iter().cloned() {
        let name = input.name.clone();
        if let Err(e) = store.add(input).await {
            tracing::error!("Skipping monitor '{}' from config: {}", name, e);
        }
    }

    // 2. engine
    let prober = Arc::new(Prober::http(cfg.probe.timeout()));
    let scheduler = Scheduler::new(store, prober, &cfg.probe);
    let reports = ReportBoard::new(Arc::new(GeminiReporter::from_env(cfg.report.clone())));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(scheduler.clone().run(shutdown_rx.clone()));

    // 3. web
    let app = web::app(AppState {
        scheduler,
        reports,
        shutdown_rx,
    });
    let listener = tokio::net::TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen))?;
    tracing::info!("Web Server listening on http://{}", cfg.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("Web server error")?;

    tracing::info!("Goodbye!");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
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

    tracing::info!("Shutdown signal received, stopping monitors...");
    // stops the scheduler and ends every SSE stream
    let _ = shutdown_tx.send(());
}
