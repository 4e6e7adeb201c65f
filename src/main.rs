/*
 * This file is part of Crownwatch.
 *
 * Copyright (C) 2025 Crownwatch contributors
 *
 * Crownwatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Crownwatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Crownwatch. If not, see <https://www.gnu.org/licenses/>.
 */

//! Crownwatch host binary

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crownwatch::cli::{Cli, Commands};
use crownwatch::{ConsoleRelay, SessionCoordinator, WorkerLink, WorkerOptions};
use cw_core::constants::env;
use cw_core::settings::{get_settings_path, load_env_file};
use cw_core::{Credentials, Settings};
use cw_protocol::{DeviceStatus, Response};
use serde_json::json;
use tracing::{debug, info, warn};

// ============================================================================
// Setup
// ============================================================================

fn init_logging() {
    let log_level = std::env::var(env::LOG).unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(&log_level)
        .init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Settings::load().context("Failed to load settings")?,
    };
    if let Some(worker) = &cli.worker {
        settings.worker.executable = Some(worker.clone());
    }
    if let Some(backend) = &cli.backend {
        settings.worker.backend = backend.clone();
    }
    Ok(settings)
}

fn start_coordinator(
    settings: &Settings,
    config: Option<PathBuf>,
) -> anyhow::Result<SessionCoordinator> {
    let options = WorkerOptions::from_settings(settings, config)?;
    debug!("Worker options: {:?}", options);
    let link = WorkerLink::spawn(&options).context("Failed to start the device worker")?;
    Ok(SessionCoordinator::new(link, settings))
}

// ============================================================================
// Output
// ============================================================================

fn print_status(status: &DeviceStatus) {
    println!("  online:       {}", status.online());
    println!("  signal:       {:?}", status.signal());
    println!("  validation:   {}", status.validation());
    println!("  data points:  {}", status.data_points());
    println!("  method:       {}", status.validation_method());
    println!("  battery:      {}", status.battery());
}

/// Print a connect response. Returns whether the headset was accepted.
fn report_connect(response: &Response) -> bool {
    match response {
        Response::Ok(data) => {
            println!("Headset detected: {}", data.message.as_deref().unwrap_or("connected"));
            if let Some(info) = &data.device_info {
                println!("  model:        {}", info.model);
                println!("  firmware:     {}", info.firmware);
            }
            if let Some(status) = &data.device_status {
                print_status(status);
            }
            true
        }
        Response::Error { message, help, device_status } => {
            println!("Connection failed: {}", message);
            if let Some(status) = device_status {
                print_status(status);
            }
            if let Some(help) = help {
                println!("Try: {}", help);
            }
            false
        }
    }
}

fn print_config(settings: &Settings) -> anyhow::Result<()> {
    let credentials = match Credentials::from_env() {
        Ok(c) => json!({
            "email": c.email,
            "password": "<redacted>",
            "device_id": c.device_id,
        }),
        Err(e) => json!({ "error": e.to_string() }),
    };
    let path = get_settings_path().map(|p| p.display().to_string()).ok();
    let doc = json!({
        "settings_path": path,
        "settings": settings,
        "credentials": credentials,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_check(mut coordinator: SessionCoordinator) -> anyhow::Result<bool> {
    println!("Connecting, this takes up to 20 seconds...");
    let accepted = report_connect(&coordinator.connect().await);
    if accepted {
        let response = coordinator.disconnect().await;
        if !response.is_ok() {
            warn!("Disconnect failed: {:?}", response.message());
        }
    }
    coordinator.shutdown().await?;
    Ok(accepted)
}

async fn run_monitor(
    mut coordinator: SessionCoordinator,
    tick: Duration,
    record: Option<Option<String>>,
    verbose: bool,
) -> anyhow::Result<bool> {
    println!("Connecting, this takes up to 20 seconds...");
    if !report_connect(&coordinator.connect().await) {
        coordinator.shutdown().await?;
        return Ok(false);
    }

    let response = coordinator.start_monitoring().await;
    if !response.is_ok() {
        println!("Could not start monitoring: {}", response.message().unwrap_or("unknown error"));
        coordinator.disconnect().await;
        coordinator.shutdown().await?;
        return Ok(false);
    }

    if let Some(name) = record {
        match coordinator.start_recording(name.as_deref()) {
            Ok(path) => println!("Recording to {}", path.display()),
            Err(e) => println!("Recording not started: {}", e),
        }
    }

    coordinator.add_relay(Box::new(ConsoleRelay { verbose }));
    println!("Monitoring, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Signal handler failed: {}", e);
                }
                info!("SIGNAL: Interrupt received, stopping");
                break;
            }
            _ = interval.tick() => {
                coordinator.tick();
            }
        }
    }

    match coordinator.stop_recording() {
        Ok(Some(summary)) => println!(
            "Recorded {} events to {}",
            summary.records,
            summary.path.display()
        ),
        Ok(None) => {}
        Err(e) => println!("Recording could not be finished: {}", e),
    }
    coordinator.stop_monitoring().await;
    coordinator.disconnect().await;

    let summary = coordinator.session_summary();
    if !summary.is_empty() {
        println!("Session summary:");
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    coordinator.shutdown().await?;
    Ok(true)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging();

    load_env_file(cli.env_file.as_deref());
    let settings = load_settings(&cli)?;

    let ok = match cli.command {
        Commands::Config => {
            print_config(&settings)?;
            true
        }
        Commands::Check => {
            let coordinator = start_coordinator(&settings, cli.config.clone())?;
            run_check(coordinator).await?
        }
        Commands::Monitor { record, verbose } => {
            let coordinator = start_coordinator(&settings, cli.config.clone())?;
            run_monitor(coordinator, settings.host.tick_interval(), record, verbose).await?
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
