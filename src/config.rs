use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Case-insensitive substring of the MIDI port name.
    pub port_match: String,
    /// Device id used in outbound SysEx until an identity reply says otherwise.
    pub device_id: u8,
    /// 0-based MIDI channel the device sends program and control changes on.
    pub device_channel: u8,
    pub request_timeout_ms: u64,
    pub request_retries: u32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            port_match: "gaia".to_string(),
            device_id: 0x10,
            device_channel: 0,
            request_timeout_ms: 1000,
            request_retries: 2,
        }
    }
}

impl EditorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// `<config dir>/gaiaedit/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gaiaedit")
        .join("config.yaml")
}

/// Load settings, falling back to defaults when the file is missing or bad.
pub fn load_config(path: &Path) -> EditorConfig {
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return EditorConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<EditorConfig>(&contents) {
            Ok(config) => {
                log::info!("load_config: loaded {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("load_config: failed to parse config: {}, using defaults", e);
                EditorConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read config file: {}, using defaults", e);
            EditorConfig::default()
        }
    }
}

/// Write settings, creating parent directories as needed.
pub fn save_config(config: &EditorConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(path, yaml)?;
    log::info!("save_config: saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config, EditorConfig::default());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: EditorConfig = serde_yaml::from_str("port_match: \"integra\"\nrequest_retries: 5\n").unwrap();
        assert_eq!(config.port_match, "integra");
        assert_eq!(config.request_retries, 5);
        assert_eq!(config.device_id, 0x10);
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_roundtrip_and_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = EditorConfig {
            device_channel: 3,
            ..EditorConfig::default()
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path), config);

        std::fs::write(&path, "device_id: [not a number").unwrap();
        assert_eq!(load_config(&path), EditorConfig::default());
    }
}
