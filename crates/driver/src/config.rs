//! Driver configuration management

use crate::usb::{ConnectionSettings, LoopSettings};
use anyhow::{Context, Result, anyhow};
use protocol::{DEFAULT_BAUD_RATE, LineConfig, parse_device_id};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// trace, debug, info, warn or error
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Line coding and transfer tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Inbound read buffer in bytes
    pub read_buffer_size: usize,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub control_timeout_ms: u64,
    /// Pause after an empty read
    pub idle_pause_ms: u64,
    /// Bound on waiting for a loop to stop on disconnect
    pub join_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        let connection = ConnectionSettings::default();
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_buffer_size: connection.loops.read_buffer_size,
            read_timeout_ms: connection.loops.read_timeout.as_millis() as u64,
            write_timeout_ms: connection.loops.write_timeout.as_millis() as u64,
            control_timeout_ms: connection.control_timeout.as_millis() as u64,
            idle_pause_ms: connection.loops.idle_pause.as_millis() as u64,
            join_timeout_ms: connection.join_timeout.as_millis() as u64,
        }
    }
}

/// Device selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device to connect to as "VVVV:PPPP"; the first catalog device otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            serial: SerialSettings::default(),
            device: DeviceSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-serial/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial").join("driver.toml")
        } else {
            PathBuf::from(".config/usb-serial/driver.toml")
        }
    }

    /// Preferred device as (vendor id, product id)
    pub fn preferred_device(&self) -> Result<Option<(u16, u16)>> {
        self.device
            .preferred
            .as_deref()
            .map(|id| parse_device_id(id).map_err(|e| anyhow!(e)))
            .transpose()
    }

    /// Settings for the connection manager
    pub fn connection_settings(&self) -> ConnectionSettings {
        let serial = &self.serial;
        ConnectionSettings {
            line: LineConfig::new(serial.baud_rate),
            control_timeout: Duration::from_millis(serial.control_timeout_ms),
            join_timeout: Duration::from_millis(serial.join_timeout_ms),
            loops: LoopSettings {
                read_buffer_size: serial.read_buffer_size,
                read_timeout: Duration::from_millis(serial.read_timeout_ms),
                write_timeout: Duration::from_millis(serial.write_timeout_ms),
                idle_pause: Duration::from_millis(serial.idle_pause_ms),
            },
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        LineConfig::checked(self.serial.baud_rate).map_err(|e| anyhow!(e))?;

        if self.serial.read_buffer_size == 0 {
            return Err(anyhow!("read_buffer_size must be at least 1 byte"));
        }

        for (name, value) in [
            ("read_timeout_ms", self.serial.read_timeout_ms),
            ("write_timeout_ms", self.serial.write_timeout_ms),
            ("control_timeout_ms", self.serial.control_timeout_ms),
            ("join_timeout_ms", self.serial.join_timeout_ms),
        ] {
            if value == 0 {
                return Err(anyhow!("{} must be greater than 0", name));
            }
        }

        self.preferred_device()?;
        Ok(())
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.read_buffer_size, 256);
        assert!(config.device.preferred.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_connection_settings() {
        let settings = DriverConfig::default().connection_settings();
        assert_eq!(settings, ConnectionSettings::default());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = DriverConfig::default();
        config.device.preferred = Some("2341:0010".to_string());
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = DriverConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = DriverConfig::default();
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_serial() {
        let mut config = DriverConfig::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.serial.read_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.serial.join_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preferred_device() {
        let mut config = DriverConfig::default();
        assert_eq!(config.preferred_device().unwrap(), None);

        config.device.preferred = Some("1eaf:0004".to_string());
        assert_eq!(config.preferred_device().unwrap(), Some((0x1EAF, 0x0004)));

        config.device.preferred = Some("2341".to_string());
        assert!(config.validate().is_err());
    }
}
