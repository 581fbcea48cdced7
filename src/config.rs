use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "devdiag", version, about)]
pub struct Cli {
    /// Path to configuration file
    #[clap(long, default_value = "./config.toml")]
    pub config: PathBuf,

    /// Override storage directory
    #[clap(long)]
    pub storage_dir: Option<PathBuf>,

    /// Override observer listen address
    #[clap(long)]
    pub listen_addr: Option<String>,

    /// Override the file the reset cause code is read from
    #[clap(long)]
    pub reset_cause_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_dir: PathBuf,
    /// Byte quota standing in for flash capacity in free-space stats.
    pub storage_quota_bytes: u64,
    pub log_blob: String,
    pub watchdog_blob: String,
    pub status_blob: String,
    pub max_log_entries: usize,
    pub max_watchdog_entries: usize,
    pub watchdog_default_secs: u32,
    pub watchdog_extended_secs: u32,
    pub listen_addr: String,
    pub reset_cause_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./devdiag-data"),
            storage_quota_bytes: 1024 * 1024,
            log_blob: "diag_log.json".to_string(),
            watchdog_blob: "diag_watchdog.json".to_string(),
            status_blob: "diag_status.json".to_string(),
            max_log_entries: 10,
            max_watchdog_entries: 10,
            watchdog_default_secs: 10,
            watchdog_extended_secs: 300,
            listen_addr: "0.0.0.0:9555".to_string(),
            reset_cause_file: None,
        }
    }
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.is_file() {
        let config_content = fs::read_to_string(&cli.config)
            .with_context(|| format!("Failed to read config file: {:?}", cli.config))?;
        toml::from_str(&config_content).context("Failed to parse config file")?
    } else {
        info!("No config file at {:?}, using defaults", cli.config);
        Config::default()
    };

    // Apply CLI overrides
    if let Some(ref storage_dir) = cli.storage_dir {
        config.storage_dir = storage_dir.clone();
    }

    if let Some(ref listen_addr) = cli.listen_addr {
        config.listen_addr = listen_addr.clone();
    }

    if let Some(ref reset_cause_file) = cli.reset_cause_file {
        config.reset_cause_file = Some(reset_cause_file.clone());
    }

    Ok(config)
}
