mod account;
mod agents;
mod app_context;
mod backend;
mod chat;
mod completion;
mod config;
mod error;
mod ingest;
mod prefs;
mod session;
mod speech;
mod ui;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use app_context::AppContext;
use config::AppConfig;
use ui::app::ParleyApp;

fn main() {
    if let Err(error) = run() {
        eprintln!("startup failed: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,parley=debug")),
        )
        .init();

    tracing::info!("Parley starting...");

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let config = AppConfig::load();
    let ctx = AppContext::build(config, runtime.handle().clone())
        .context("failed to assemble application context")?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 860.0])
            .with_min_inner_size([420.0, 520.0])
            .with_title("Parley"),
        ..Default::default()
    };

    let ui_result = eframe::run_native(
        "Parley",
        native_options,
        Box::new(move |cc| Ok(Box::new(ParleyApp::new(cc, runtime, ctx)))),
    );

    if let Err(error) = ui_result {
        anyhow::bail!("UI error: {}", error);
    }

    tracing::info!("Parley closed");
    Ok(())
}
