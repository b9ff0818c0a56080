mod app;
mod collector;
mod handlers;
mod report;
mod state;

use anyhow::Context;
use ethreport_common::{bind_listener, init_tracing, shutdown_signal, LogConfig};

use crate::collector::spawn_collector;
use crate::state::{AppState, CollectorConfig, REPORT_PATH, REPORT_PORT};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guards = init_tracing(&LogConfig::from_env("report-service"));

    let collector_config = CollectorConfig::from_env();
    let mut collector = spawn_collector(&collector_config);
    tracing::debug!(
        shell = %collector_config.shell,
        status = collector.status().as_str(),
        "collector launched"
    );
    tokio::spawn(async move {
        let status = collector.finished().await;
        // Readiness is only reported; requests are served regardless.
        let present = tokio::fs::metadata(REPORT_PATH)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if present {
            tracing::info!(status = status.as_str(), report = REPORT_PATH, "collector finished");
        } else {
            tracing::warn!(
                status = status.as_str(),
                report = REPORT_PATH,
                "collector finished without a report file"
            );
        }
    });

    let app = app::build_router(AppState::new(REPORT_PATH));
    let listener = bind_listener(REPORT_PORT)
        .await
        .with_context(|| format!("bind port {REPORT_PORT}"))?;
    tracing::info!(port = REPORT_PORT, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    Ok(())
}
