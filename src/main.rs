use agentgate_core::api::ApiServer;
use agentgate_core::config::Config;
use agentgate_core::core::Services;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Execution control plane: admits work orders, drives their iteration
/// loop, and serves progress over HTTP/SSE/WebSocket.
#[derive(Debug, Parser)]
#[command(name = "agentgate-core", version)]
struct Cli {
    /// Root directory for persisted state and workspace checkouts.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Scan persisted work orders/runs for corruption before serving traffic.
    #[arg(long)]
    scan_corruption: bool,

    /// Exit with a service error instead of continuing when the startup
    /// corruption scan finds any invalid record. No effect without
    /// `--scan-corruption`.
    #[arg(long)]
    fail_fast_on_corruption: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    info!("starting agentgate-core");

    let services = Arc::new(Services::bootstrap(&config, cli.data_dir));

    if cli.scan_corruption {
        match services.persistence.scan_for_corruption().await {
            Ok(report) if report.invalid_count > 0 => {
                warn!(
                    invalid = report.invalid_count,
                    total = report.total_files,
                    corrupted = ?report.corrupted_files,
                    "persistence corruption scan found invalid records"
                );
                if cli.fail_fast_on_corruption {
                    return ExitCode::from(2);
                }
            }
            Ok(report) => {
                info!(total = report.total_files, duration_ms = report.duration_ms, "persistence scan clean");
            }
            Err(e) => {
                error!("persistence corruption scan failed: {e}");
                return ExitCode::from(2);
            }
        }
    }

    let api_server = match ApiServer::new(&config, Arc::clone(&services)) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to build API server: {e}");
            return ExitCode::from(2);
        }
    };

    let background_tasks = services.start_background_tasks();

    let result = tokio::select! {
        result = api_server.run() => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    for handle in background_tasks {
        handle.abort();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("API server failed: {e}");
            ExitCode::from(2)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
