mod broadcast;
mod clock;
mod config;
mod control;
mod engine;
mod entry;
mod error;
mod pause;
mod reset;
mod server;
mod storage;
mod store;

use anyhow::Result;
use broadcast::BroadcastHub;
use clap::Parser;
use clock::SystemClock;
use control::EngineFlags;
use engine::{DiagEngine, EngineParts, Origin};
use log::{error, info, warn};
use pause::{NoopWatchdog, WatchdogTimer};
use reset::FileResetSource;
use std::sync::Arc;
use storage::DirStorage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;

    info!("Starting devdiag");

    // Parse command-line arguments
    let cli = config::Cli::parse();

    // Load configuration
    let config = config::load_config(&cli)?;
    info!("Configuration loaded successfully");

    let storage = Arc::new(DirStorage::new(
        config.storage_dir.clone(),
        config.storage_quota_bytes,
    )?);

    // Shared state between the engine and the observer transport
    let hub = BroadcastHub::new();
    let flags = Arc::new(Mutex::new(EngineFlags::default()));

    let watchdog: Arc<dyn WatchdogTimer> = Arc::new(NoopWatchdog);
    watchdog.arm(config.watchdog_default_secs);

    let engine = Arc::new(DiagEngine::new(EngineParts {
        storage,
        clock: Arc::new(SystemClock::new()),
        reset_source: Arc::new(FileResetSource::new(config.reset_cause_file.clone())),
        watchdog,
        hub: hub.clone(),
        flags: Arc::clone(&flags),
        log_blob: config.log_blob.clone(),
        watchdog_blob: config.watchdog_blob.clone(),
        status_blob: config.status_blob.clone(),
        max_log_entries: config.max_log_entries,
        max_watchdog_entries: config.max_watchdog_entries,
        extended_grace_secs: config.watchdog_extended_secs,
    }));

    // Boot-time reset correlation before any event is emitted
    engine.on_boot();

    // Spawn the observer transport task
    let server_handle = tokio::spawn(server::run(config.listen_addr.clone(), hub, flags));

    // Drive the engine from stdin lines, standing in for the application
    let input_handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { drive_from_stdin(engine).await })
    };

    info!("All tasks started successfully");

    tokio::select! {
        _ = server_handle => {
            error!("Observer transport terminated unexpectedly");
        }
        _ = input_handle => {
            info!("Input closed, shutting down");
        }
    }

    Ok(())
}

/// Reads `SEVERITY message [name=value]` lines and emits them, plus the
/// `clear` action that wipes all persisted logs.
async fn drive_from_stdin(engine: Arc<DiagEngine>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("clear") {
            engine.clear_all();
            continue;
        }
        if line.eq_ignore_ascii_case("show") {
            show_logs(&engine);
            continue;
        }
        match parse_event(line) {
            Some((severity, message, var)) => {
                let var = var
                    .as_ref()
                    .map(|(name, value)| (name.as_str(), value.as_str()));
                engine
                    .emit(severity, &message, var, Origin::here("stdin"))
                    .await;
            }
            None => warn!("Unparseable event line: {}", line),
        }
    }
}

/// Dump both persisted stores to the console, newest first.
fn show_logs(engine: &DiagEngine) {
    let entries = engine.log_entries();
    info!("=== Diagnostic log ({} entries) ===", entries.len());
    for entry in entries {
        info!(
            "{} | {} ms | {}():{} | {} | {} = {} | reset {}",
            entry.timestamp,
            entry.uptime_ms,
            entry.function,
            entry.line,
            entry.message,
            entry.var_name,
            entry.var_value,
            entry.reset_reason
        );
    }

    let watchdogs = engine.watchdog_entries();
    info!("=== Watchdog log ({} entries) ===", watchdogs.len());
    for entry in watchdogs {
        info!(
            "{} | {}():{} | {} | {} ({}{})",
            entry.timestamp,
            entry.function,
            entry.line,
            entry.message,
            entry.reset_text,
            entry.reset_color,
            if entry.critical { ", critical" } else { "" }
        );
    }
}

/// `"3 sensor glitch temp=99"` becomes severity 3, message "sensor glitch",
/// variable ("temp", "99"). The trailing token is a variable only when it
/// contains `=`.
fn parse_event(line: &str) -> Option<(u8, String, Option<(String, String)>)> {
    let (severity, rest) = line.split_once(char::is_whitespace)?;
    let severity: u8 = severity.parse().ok()?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let mut message = rest;
    let mut var = None;
    if let Some((head, last)) = rest.rsplit_once(char::is_whitespace) {
        if let Some((name, value)) = last.split_once('=') {
            if !name.is_empty() {
                message = head.trim_end();
                var = Some((name.to_string(), value.to_string()));
            }
        }
    }

    Some((severity, message.to_string(), var))
}
