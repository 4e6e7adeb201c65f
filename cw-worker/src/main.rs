//! Crownwatch device worker (crownwatch-worker)
//!
//! Spawned by the host service with stdin/stdout piped. Every interaction
//! with the headset SDK happens in this process, so a misbehaving SDK can
//! only take the worker down, never the host.
//!
//! # Hardening Measures
//! - No core dumps (credentials live in this process)
//! - Restrictive umask (0077)
//! - SIGINT ignored: the host decides when the worker stops
//! - Logs go to the journal or stderr; stdout carries protocol frames only

use std::path::PathBuf;
use std::sync::Arc;

use cw_core::constants::{env, worker};
use cw_core::settings::{load_env_file, Settings};
use cw_core::{DetectionConfig, DeviceSession, SimulatedBackend};
use tracing::{debug, error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Security Hardening
// ============================================================================

fn set_rlimit(resource: i32, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit is called with a known RLIMIT_* constant and an initialized rlimit struct.
    unsafe {
        #[allow(clippy::useless_conversion)]
        if libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) != 0 {
            warn!("Failed to set rlimit for resource {}", resource);
        }
    }
}

/// Disable core dumps and tighten the file creation mask
fn harden_process() {
    set_rlimit(libc::RLIMIT_CORE as i32, 0, 0);
    // SAFETY: umask only sets the process file creation mask.
    unsafe { libc::umask(0o077) };
}

// ============================================================================
// CLI
// ============================================================================

struct Args {
    backend: String,
    config: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

fn print_help() {
    eprintln!("crownwatch-worker {} - Crownwatch device worker", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    crownwatch-worker [OPTIONS]");
    eprintln!();
    eprintln!("Reads commands as JSON lines on stdin and writes responses and events");
    eprintln!("to stdout. Normally started by `crownwatch`, not by hand.");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -b, --backend NAME  Device backend: biological, mirrored, stuck, offline");
    eprintln!(
        "    -c, --config PATH   Settings file (default: ~/.config/crownwatch/settings.json)"
    );
    eprintln!("    -e, --env-file PATH Load credentials from this .env file");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}     Account email", env::EMAIL);
    eprintln!("    {}  Account password", env::PASSWORD);
    eprintln!("    {} Headset device id", env::DEVICE_ID);
    eprintln!("    {}      Log level (trace, debug, info, warn, error)", env::LOG);
}

fn parse_args() -> Option<Args> {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        backend: worker::DEFAULT_BACKEND.to_string(),
        config: None,
        env_file: None,
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-v" | "--version" => {
                eprintln!("crownwatch-worker {}", VERSION);
                return None;
            }
            flag @ ("-b" | "--backend" | "-c" | "--config" | "-e" | "--env-file") => {
                i += 1;
                let Some(value) = argv.get(i) else {
                    eprintln!("Error: {} requires an argument", flag);
                    std::process::exit(2);
                };
                match flag {
                    "-b" | "--backend" => args.backend = value.clone(),
                    "-c" | "--config" => args.config = Some(PathBuf::from(value)),
                    _ => args.env_file = Some(PathBuf::from(value)),
                }
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(2);
            }
        }
        i += 1;
    }
    Some(args)
}

// ============================================================================
// Logging
// ============================================================================

/// Journald when available, otherwise stderr. Never stdout.
fn init_logging() -> bool {
    let log_level = std::env::var(env::LOG).unwrap_or_else(|_| "info".to_string());

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer.with_syslog_identifier("crownwatch-worker".to_string()))
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => eprintln!("Failed to create journald layer: {}, falling back to stderr", e),
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: Panic hook; stdout is reserved for protocol frames
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    // PHASE 1: Hardening before anything touches credentials
    harden_process();

    // PHASE 2: Arguments
    let Some(args) = parse_args() else {
        return Ok(());
    };

    // PHASE 3: Logging
    let journald = init_logging();
    info!("STARTUP: crownwatch-worker {} (pid {})", VERSION, std::process::id());
    debug!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stderr" });

    // PHASE 4: Signals. Ctrl-C reaches the whole process group; the host sends quit.
    if let Err(e) = ctrlc::set_handler(|| {
        info!("SIGNAL: Ignoring SIGINT, waiting for quit from the host");
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    let mut stdout = tokio::io::stdout();

    // PHASE 5: Configuration
    load_env_file(args.env_file.as_deref());
    let settings = match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid settings: {}", e);
            cw_worker::stdio::report_fatal(&mut stdout, format!("Invalid settings: {}", e)).await?;
            std::process::exit(1);
        }
    };

    // PHASE 6: Device backend
    let backend = match SimulatedBackend::from_name(&args.backend) {
        Ok(b) => b,
        Err(e) => {
            error!("Device backend unavailable: {}", e);
            let message = format!("Device SDK unavailable: {}", e);
            cw_worker::stdio::report_fatal(&mut stdout, message).await?;
            std::process::exit(1);
        }
    };
    info!("STARTUP: Using {:?} backend", backend.profile());

    // PHASE 7: Serve
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let session = DeviceSession::new(
        Arc::new(backend),
        None,
        DetectionConfig::from(&settings.detection),
        event_tx,
    );

    if let Err(e) = cw_worker::stdio::serve(session, event_rx, tokio::io::stdin(), stdout).await {
        error!("Worker output failed: {}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: Worker terminated");
    // The stdin reader may still sit in a blocking read; do not wait for it.
    std::process::exit(0);
}
