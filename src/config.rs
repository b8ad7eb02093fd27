use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::{scenario::Launchers, sway::DEFAULT_SWAYMSG, transport::DEFAULT_TIMEOUT};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MACHINE_ID_FILE: &str = "/etc/machine-id";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a positive number of milliseconds, got '{value}'")]
    InvalidDuration { name: &'static str, value: String },
    #[error("unable to read machine id from {}: {source}", .path.display())]
    MachineId {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("machine id in {} is empty", .0.display())]
    EmptyMachineId(PathBuf),
}

/// Agent configuration, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `MQTT_SERVER_URL`
    pub mqtt_server_url: String,
    /// `MQTT_TOPIC_PREFIX`
    pub topic_prefix: String,
    /// `DISPLAY_AGENT_REFRESH_MS`
    pub refresh_interval: Duration,
    /// `DISPLAY_AGENT_TIMEOUT_MS`, bounds every broker operation
    pub transport_timeout: Duration,
    /// `DISPLAY_AGENT_SWAYMSG`
    pub swaymsg: String,
    /// `DISPLAY_AGENT_BROWSER` and `DISPLAY_AGENT_PLAYER`
    pub launchers: Launchers,
    /// `DISPLAY_AGENT_MACHINE_ID_FILE`
    pub machine_id_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source; empty
    /// values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let millis = |key: &'static str, default: Duration| match get(key) {
            None => Ok(default),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
                _ => Err(ConfigError::InvalidDuration { name: key, value }),
            },
        };

        let defaults = Launchers::default();
        Ok(Config {
            mqtt_server_url: required("MQTT_SERVER_URL")?,
            topic_prefix: required("MQTT_TOPIC_PREFIX")?,
            refresh_interval: millis("DISPLAY_AGENT_REFRESH_MS", DEFAULT_REFRESH_INTERVAL)?,
            transport_timeout: millis("DISPLAY_AGENT_TIMEOUT_MS", DEFAULT_TIMEOUT)?,
            swaymsg: get("DISPLAY_AGENT_SWAYMSG").unwrap_or_else(|| DEFAULT_SWAYMSG.to_string()),
            launchers: Launchers {
                browser: get("DISPLAY_AGENT_BROWSER").unwrap_or(defaults.browser),
                player: get("DISPLAY_AGENT_PLAYER").unwrap_or(defaults.player),
            },
            machine_id_file: get("DISPLAY_AGENT_MACHINE_ID_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MACHINE_ID_FILE)),
        })
    }
}

/// Read the machine id, hyphenated like `systemd-id128 machine-id -u` prints it
pub fn read_machine_id(path: &Path) -> Result<String, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::MachineId {
        path: path.to_path_buf(),
        source,
    })?;
    let id = raw.trim();
    if id.is_empty() {
        return Err(ConfigError::EmptyMachineId(path.to_path_buf()));
    }
    Ok(format_machine_id(id))
}

fn format_machine_id(id: &str) -> String {
    if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return id.to_string();
    }
    let id = id.to_ascii_lowercase();
    format!(
        "{}-{}-{}-{}-{}",
        &id[0..8],
        &id[8..12],
        &id[12..16],
        &id[16..20],
        &id[20..32]
    )
}
