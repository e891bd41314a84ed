use std::sync::Arc;

use anyhow::Context;
use printcast_server::config::Settings;
use printcast_server::state::AppState;
use printcast_streamer::moonraker::MoonrakerSource;
use printcast_streamer::{Orchestrator, PrintMonitor};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    let orchestrator = Arc::new(
        Orchestrator::new(settings.streamer.clone()).context("invalid streamer configuration")?,
    );
    info!(
        cache_dir = %settings.streamer.cache_dir.display(),
        ffmpeg_log = %settings.streamer.ffmpeg_log_path.display(),
        "orchestrator ready"
    );

    // Normalize intro/outro ahead of the first session
    {
        let orch = orchestrator.clone();
        tokio::spawn(async move {
            let prepared = orch.prepare_media().await;
            info!(
                intro = ?prepared.intro_video,
                outro = ?prepared.outro_video,
                "media prepared"
            );
        });
    }

    let shutdown = CancellationToken::new();
    let mut monitor_task = None;
    let app_state = match &settings.integrations.moonraker_url {
        Some(url) => {
            let source = MoonrakerSource::new(url.as_str()).context("failed to build Moonraker client")?;
            let monitor = PrintMonitor::new(source, orchestrator.clone(), settings.auto.clone());
            let print_state = monitor.subscribe();
            info!(url = %url, "print monitor enabled");
            monitor_task = Some(tokio::spawn(monitor.run(shutdown.clone())));
            AppState {
                orchestrator: orchestrator.clone(),
                print_state,
            }
        }
        None => {
            info!("no Moonraker URL configured, autostart disabled");
            AppState::standalone(orchestrator.clone())
        }
    };

    let app = printcast_server::routes::build_router(app_state);

    let bind_addr = &settings.integrations.http_bind;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(task) = monitor_task {
        if let Err(e) = task.await {
            warn!(error = %e, "print monitor task failed");
        }
    }
    let outcome = orchestrator.stop().await;
    info!(?outcome, "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let term = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    info!("shutdown signal received");
}
