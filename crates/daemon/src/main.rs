// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use loader_core::SystemState;
use loaderd::{control, dialog_loop, startup, vram_logger};

/// Voice-assistant orchestrator: supervises the five workers and drives the
/// dialog state machine.
#[derive(Parser, Debug)]
#[command(name = "loaderd", version, about)]
struct Args {
    /// Path to the INI configuration file.
    #[arg(long, default_value = "config/config.ini")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = loader_core::Config::load(&args.config)?;

    let state = startup::run(config).await?;
    tracing::info!("startup complete; entering IDLE");

    dialog_loop::spawn(state.clone());
    vram_logger::spawn(state.clone());

    let control_state = state.clone();
    let control_task = tokio::spawn(async move {
        if let Err(err) = control::serve(control_state).await {
            tracing::error!(error = %err, "control surface exited");
        }
    });

    wait_for_shutdown_signal().await?;
    tracing::info!("shutdown signal received; stopping workers");
    state.set_state(SystemState::ShuttingDown).await;
    control_task.abort();

    state.supervisor.lock().await.stop_all().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
