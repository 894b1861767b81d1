use clap::Parser;
use lib_topology::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_topology.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Network topology telemetry server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TOPOLOGY_PORT", help = "Port to listen on for HTTP and websocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "TOPOLOGY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TOPOLOGY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TOPOLOGY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TOPOLOGY_DEVICES_FILE", help = "JSON file with the devices to collect from at startup.")]
    pub devices_file: Option<PathBuf>,

    #[clap(long, env = "TOPOLOGY_REAP_INTERVAL_SECONDS", help = "Seconds between stale neighbor polls.")]
    pub reap_interval_seconds: Option<u64>,

    #[clap(long, env = "TOPOLOGY_EVENT_CAPACITY", help = "Capacity of the change event channel.")]
    pub event_capacity: Option<usize>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL URL. The in-memory store is used when unset.")]
    pub database_url: Option<String>,

    #[clap(long, env = "TOPOLOGY_DB_MAX_CONNECTIONS", help = "Maximum PostgreSQL pool size.")]
    pub db_max_connections: Option<usize>,

    #[clap(long, env = "TOPOLOGY_RELAY_PATH_PREFIX", help = "Path in front of the subscription id on the telemetry relay.")]
    pub relay_path_prefix: Option<String>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub devices_file: PathBuf,
    pub reap_interval: Duration,
    pub event_capacity: usize,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub relay_path_prefix: String,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            devices_file: other.devices_file.or(self.devices_file),
            reap_interval_seconds: other.reap_interval_seconds.or(self.reap_interval_seconds),
            event_capacity: other.event_capacity.or(self.event_capacity),
            database_url: other.database_url.or(self.database_url),
            db_max_connections: other.db_max_connections.or(self.db_max_connections),
            relay_path_prefix: other.relay_path_prefix.or(self.relay_path_prefix),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            devices_file: Some(PathBuf::from("devices.json")),
            reap_interval_seconds: Some(5),
            event_capacity: Some(1024),
            db_max_connections: Some(8),
            relay_path_prefix: Some("/subscriptions".to_string()),
            ..Default::default()
        }
    }

    fn resolve(self) -> Settings {
        let filled = Config::defaults().merge(self);
        Settings {
            port: filled.port.unwrap_or(8080),
            log_dir: filled.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: filled.log_level.unwrap_or_else(|| "info".to_string()),
            devices_file: filled.devices_file.unwrap_or_else(|| PathBuf::from("devices.json")),
            reap_interval: Duration::from_secs(filled.reap_interval_seconds.unwrap_or(5).max(1)),
            event_capacity: filled.event_capacity.unwrap_or(1024).max(1),
            database_url: filled.database_url.filter(|url| !url.trim().is_empty()),
            db_max_connections: filled.db_max_connections.unwrap_or(8).max(1),
            relay_path_prefix: filled.relay_path_prefix.unwrap_or_else(|| "/subscriptions".to_string()),
        }
    }
}

/// Reads the JSON config file, if there is a readable one at `path`.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        tracing::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                tracing::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Defaults, then the config file, then environment and CLI.
pub fn load_config_from(cli: Config) -> Settings {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli).resolve()
}

pub fn load_config() -> Settings {
    load_config_from(Config::parse())
}

/// Loads the startup device list. A missing file means no devices.
pub fn load_devices(path: &Path) -> anyhow::Result<Vec<DeviceDescriptor>> {
    if !path.exists() {
        tracing::info!("Devices file not found at {}. Starting with no devices.", path.display());
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    let devices: Vec<DeviceDescriptor> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid devices file {}: {}", path.display(), e))?;
    Ok(devices)
}
