// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `loaderctl` subcommands: thin wrappers around `DaemonClient` plus
//! text/JSON rendering (§4.1 "Control surface").

use crate::client::DaemonClient;
use crate::exit_error::ExitError;
use crate::output::{format_or_json, print_aligned_rows, OutputFormat};

pub async fn status(client: &DaemonClient, format: OutputFormat) -> Result<(), ExitError> {
    let response = client.status().await?;
    format_or_json(format, &response, || {
        let mut rows = vec![("state".to_string(), response.state.to_string())];
        for name in ["logger", "kwd", "stt", "llm", "tts"] {
            let health = response.service_health.get(name).map(ToString::to_string).unwrap_or_else(|| "UNKNOWN".to_string());
            rows.push((name.to_string(), health));
        }
        rows.push(("vram_used_mb".to_string(), response.vram_used_mb.to_string()));
        rows.push(("uptime_ms".to_string(), crate::color::muted(&response.uptime_ms.to_string())));
        print_aligned_rows(&rows);
    })
    .map_err(|err| ExitError::new(1, err.to_string()))
}

pub async fn pids(client: &DaemonClient, format: OutputFormat) -> Result<(), ExitError> {
    let response = client.pids().await?;
    format_or_json(format, &response, || {
        let mut rows: Vec<(String, String)> = response.pids.iter().map(|(name, pid)| (name.clone(), pid.to_string())).collect();
        rows.sort();
        if rows.is_empty() {
            println!("no workers running");
        } else {
            print_aligned_rows(&rows);
        }
    })
    .map_err(|err| ExitError::new(1, err.to_string()))
}

pub async fn start(client: &DaemonClient, service_name: &str) -> Result<(), ExitError> {
    let response = client.start_service(service_name).await?;
    if response.success {
        println!("{} started", crate::color::header(service_name));
        Ok(())
    } else {
        Err(ExitError::new(response.code, response.message))
    }
}

pub async fn stop(client: &DaemonClient, service_name: &str) -> Result<(), ExitError> {
    let response = client.stop_service(service_name).await?;
    if response.success {
        println!("{} stopped", crate::color::header(service_name));
        Ok(())
    } else {
        Err(ExitError::new(response.code, response.message))
    }
}

pub async fn check(client: &DaemonClient) -> Result<(), ExitError> {
    let response = client.check().await?;
    println!("{}", response.status);
    Ok(())
}
