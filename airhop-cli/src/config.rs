use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use airhop_core::{DEFAULT_PORT, Platform};
use serde::{Deserialize, Serialize};

/// `config.json` is a handful of fields; anything bigger is not ours.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;
pub const MAX_INTERFACE_LEN: usize = 15;
pub const MAX_BLE_RETRY_LIMIT: u32 = 3_600;
pub const DEFAULT_INTERFACE: &str = "wlan0";
pub const DEFAULT_BLE_RETRY_LIMIT: u32 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetworkBackend {
    /// Create and join networks through NetworkManager.
    #[default]
    Nmcli,
    /// Both devices already share a network; nothing is created or joined.
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SavedConfig {
    #[serde(default)]
    pub local_platform: Option<String>,
    #[serde(default)]
    pub peer_platform: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub network: Option<NetworkBackend>,
    #[serde(default)]
    pub ble_retry_limit: Option<u32>,
}

impl SavedConfig {
    /// Values set in `overrides` win.
    pub fn merged_with(&self, overrides: &SavedConfig) -> SavedConfig {
        SavedConfig {
            local_platform: overrides
                .local_platform
                .clone()
                .or_else(|| self.local_platform.clone()),
            peer_platform: overrides
                .peer_platform
                .clone()
                .or_else(|| self.peer_platform.clone()),
            port: overrides.port.or(self.port),
            interface: overrides.interface.clone().or_else(|| self.interface.clone()),
            network: overrides.network.or(self.network),
            ble_retry_limit: overrides.ble_retry_limit.or(self.ble_retry_limit),
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub local: Platform,
    pub peer: Platform,
    pub port: u16,
    pub interface: String,
    pub network: NetworkBackend,
    pub ble_retry_limit: u32,
}

impl Settings {
    pub fn from_config(cfg: &SavedConfig) -> Result<Settings, String> {
        validate_config(cfg)?;
        let local = match cfg.local_platform.as_deref() {
            Some(name) => name.parse().map_err(|e| format!("{e}"))?,
            None => Platform::current()
                .ok_or_else(|| "Cannot tell which platform this is; pass --local.".to_string())?,
        };
        let peer = cfg
            .peer_platform
            .as_deref()
            .ok_or_else(|| "The peer platform is required; pass --peer.".to_string())?
            .parse()
            .map_err(|e| format!("{e}"))?;
        Ok(Settings {
            local,
            peer,
            port: cfg.port.unwrap_or(DEFAULT_PORT),
            interface: cfg
                .interface
                .clone()
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            network: cfg.network.unwrap_or_default(),
            ble_retry_limit: cfg.ble_retry_limit.unwrap_or(DEFAULT_BLE_RETRY_LIMIT),
        })
    }
}

pub fn validate_config(cfg: &SavedConfig) -> Result<(), String> {
    let mut errors: Vec<String> = Vec::new();

    for (label, value) in [
        ("Local platform", &cfg.local_platform),
        ("Peer platform", &cfg.peer_platform),
    ] {
        if let Some(name) = value {
            if name.parse::<Platform>().is_err() {
                errors.push(format!(
                    "{label} '{name}' is unknown (expected android, ios, linux, mac or windows)."
                ));
            }
        }
    }

    if cfg.port == Some(0) {
        errors.push("Port must be between 1 and 65535.".to_string());
    }

    if let Some(interface) = &cfg.interface {
        let interface = interface.trim();
        if interface.is_empty() {
            errors.push("Interface name must not be empty.".to_string());
        } else if interface.len() > MAX_INTERFACE_LEN {
            errors.push(format!(
                "Interface name is too long ({} > {} chars).",
                interface.len(),
                MAX_INTERFACE_LEN
            ));
        } else if interface.contains(['/', ' ']) {
            errors.push("Interface name must not contain '/' or spaces.".to_string());
        }
    }

    if let Some(limit) = cfg.ble_retry_limit {
        if limit == 0 || limit > MAX_BLE_RETRY_LIMIT {
            errors.push(format!(
                "Bluetooth retry limit must be between 1 and {MAX_BLE_RETRY_LIMIT}."
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Please fix the following:\n\n- {}",
            errors.join("\n- ")
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is {size} bytes, over the {MAX_CONFIG_BYTES} byte limit", path.display())]
    TooLarge { path: PathBuf, size: u64 },
    #[error("{} is not valid config JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `$AIRHOP_CONFIG_DIR/config.json`, else the per-user config directory.
pub fn config_path() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("AIRHOP_CONFIG_DIR") {
        let dir = PathBuf::from(override_dir);
        let _ = fs::create_dir_all(&dir);
        return dir.join("config.json");
    }

    let base = std::env::var_os("APPDATA")
        .or_else(|| std::env::var_os("XDG_CONFIG_HOME"))
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    let dir = base.join("airhop");
    let _ = fs::create_dir_all(&dir);
    dir.join("config.json")
}

pub fn load_config(path: &Path) -> Result<SavedConfig, ConfigError> {
    let file = fs::File::open(path).map_err(|e| ConfigError::io(path, e))?;
    let size = file.metadata().map_err(|e| ConfigError::io(path, e))?.len();
    if size > MAX_CONFIG_BYTES {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            size,
        });
    }
    serde_json::from_reader(io::BufReader::new(file)).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write next to the target, flush to disk, then rename over it. The rename
/// replaces an existing file in one step, so readers see the old or the new
/// config and never a missing one.
pub fn save_config(path: &Path, cfg: &SavedConfig) -> Result<(), ConfigError> {
    let staging = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(cfg).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    {
        let mut file = fs::File::create(&staging).map_err(|e| ConfigError::io(&staging, e))?;
        file.write_all(&payload)
            .and_then(|()| file.sync_all())
            .map_err(|e| ConfigError::io(&staging, e))?;
    }
    fs::rename(&staging, path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        ConfigError::io(path, e)
    })
}

/// Another process may hold the file briefly (virus scanners on Windows);
/// give it a few tries with doubling pauses.
pub fn save_config_with_retry(path: &Path, cfg: &SavedConfig) -> Result<(), ConfigError> {
    const ATTEMPTS: u32 = 3;
    let mut pause = Duration::from_millis(50);
    for _ in 1..ATTEMPTS {
        match save_config(path, cfg) {
            Err(ConfigError::Io { .. }) => {
                std::thread::sleep(pause);
                pause *= 2;
            }
            result => return result,
        }
    }
    save_config(path, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_saved_values() {
        let saved = SavedConfig {
            peer_platform: Some("android".to_string()),
            port: Some(4000),
            interface: Some("wlp2s0".to_string()),
            ..SavedConfig::default()
        };
        let overrides = SavedConfig {
            port: Some(5000),
            ..SavedConfig::default()
        };
        let merged = saved.merged_with(&overrides);
        assert_eq!(merged.port, Some(5000));
        assert_eq!(merged.interface.as_deref(), Some("wlp2s0"));
        assert_eq!(merged.peer_platform.as_deref(), Some("android"));
    }

    #[test]
    fn settings_fill_defaults() {
        let cfg = SavedConfig {
            local_platform: Some("linux".to_string()),
            peer_platform: Some("ios".to_string()),
            ..SavedConfig::default()
        };
        let settings = Settings::from_config(&cfg).unwrap();
        assert_eq!(settings.local, Platform::Linux);
        assert_eq!(settings.peer, Platform::Ios);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.interface, DEFAULT_INTERFACE);
        assert_eq!(settings.network, NetworkBackend::Nmcli);
        assert_eq!(settings.ble_retry_limit, DEFAULT_BLE_RETRY_LIMIT);
    }

    #[test]
    fn missing_peer_is_reported() {
        let cfg = SavedConfig {
            local_platform: Some("linux".to_string()),
            ..SavedConfig::default()
        };
        let err = Settings::from_config(&cfg).unwrap_err();
        assert!(err.contains("--peer"), "{err}");
    }

    #[test]
    fn validation_collects_every_problem() {
        let cfg = SavedConfig {
            local_platform: Some("beos".to_string()),
            peer_platform: Some("android".to_string()),
            port: Some(0),
            interface: Some("a very long interface".to_string()),
            network: None,
            ble_retry_limit: Some(0),
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.starts_with("Please fix the following:"));
        assert!(err.contains("'beos' is unknown"));
        assert!(err.contains("Port"));
        assert!(err.contains("too long"));
        assert!(err.contains("retry limit"));
    }
}
