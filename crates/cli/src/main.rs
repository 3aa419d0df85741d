// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `loaderctl`: a small control CLI that speaks the orchestrator's wire
//! protocol directly (§4.1 "Control surface").

mod client;
mod color;
mod commands;
mod exit_error;
mod output;

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use client::DaemonClient;
use exit_error::ExitError;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "loaderctl", version, about)]
struct Cli {
    /// Orchestrator control port (defaults to the standard loader.port).
    #[arg(long, default_value = "5002")]
    port: u16,

    /// Output format for commands that render structured data.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the orchestrator's health, per-worker status, and VRAM usage.
    Status,
    /// Print the OS pid of every running worker.
    Pids,
    /// Ask the orchestrator to boot one worker.
    Start {
        /// One of logger, kwd, stt, llm, tts.
        service: String,
    },
    /// Ask the orchestrator to stop one worker.
    Stop {
        /// One of logger, kwd, stt, llm, tts.
        service: String,
    },
    /// Check whether the orchestrator's control surface is reachable.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let client = DaemonClient::new(addr);

    let result = match cli.command {
        Command::Status => commands::status(&client, cli.output).await,
        Command::Pids => commands::pids(&client, cli.output).await,
        Command::Start { service } => commands::start(&client, &service).await,
        Command::Stop { service } => commands::stop(&client, &service).await,
        Command::Check => commands::check(&client).await,
    };

    if let Err(err) = result {
        exit_with(err);
    }
}

fn exit_with(err: ExitError) -> ! {
    eprintln!("error: {err}");
    std::process::exit(err.code);
}
