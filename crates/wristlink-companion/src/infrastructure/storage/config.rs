//! TOML-based configuration persistence for the companion.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Wristlink\config.toml`
//! - Linux:    `~/.config/wristlink/config.toml`
//! - macOS:    `~/Library/Application Support/Wristlink/config.toml`
//!
//! Example:
//!
//! ```toml
//! [companion]
//! app_id = "a3421feed289106a538cb9547ab12095"
//! log_level = "info"
//!
//! [registry]
//! poll_interval_ms = 1000
//!
//! [correlator]
//! response_timeout_secs = 300
//! warmup_ms = 500
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  This allows
//! the companion to work on first run (before a config file exists) and when
//! upgrading from an older config file that is missing newer fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wristlink_core::{DeviceId, DeviceStatus};

use crate::application::correlator::QueryTimings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub companion: CompanionConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// General companion settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanionConfig {
    /// Vendor store identifier of the watch app.
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Device to talk to when several are connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_device: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// Known-device poll period in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Correlator timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelatorConfig {
    /// How long a watch may take to answer a query.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    /// Added to the response timeout to form a query's overall deadline.
    #[serde(default = "default_deadline_buffer_secs")]
    pub deadline_buffer_secs: u64,
    /// Overall bound for a send that expects no reply.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Delay between opening the reply subscription and sending.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    /// Bound for each app-readiness step.
    #[serde(default = "default_gate_step_timeout_secs")]
    pub gate_step_timeout_secs: u64,
}

/// Devices the headless simulated transport pretends to see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatorConfig {
    #[serde(default = "default_simulated_devices")]
    pub devices: Vec<SimulatedDeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedDeviceEntry {
    pub id: u64,
    pub name: String,
    #[serde(default = "default_true")]
    pub connected: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_app_id() -> String {
    "a3421feed289106a538cb9547ab12095".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_response_timeout_secs() -> u64 {
    300
}
fn default_deadline_buffer_secs() -> u64 {
    10
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_warmup_ms() -> u64 {
    500
}
fn default_gate_step_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_simulated_devices() -> Vec<SimulatedDeviceEntry> {
    vec![
        SimulatedDeviceEntry {
            id: 3_316_781_058,
            name: "fenix 7".to_string(),
            connected: true,
        },
        SimulatedDeviceEntry {
            id: 1_092_004_117,
            name: "Venu 2".to_string(),
            connected: false,
        },
    ]
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            log_level: default_log_level(),
            preferred_device: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
            deadline_buffer_secs: default_deadline_buffer_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            warmup_ms: default_warmup_ms(),
            gate_step_timeout_secs: default_gate_step_timeout_secs(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: default_simulated_devices(),
        }
    }
}

// ── Runtime settings ──────────────────────────────────────────────────────────

impl CompanionConfig {
    pub fn preferred_device_id(&self) -> Option<DeviceId> {
        self.preferred_device.map(DeviceId)
    }
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CorrelatorConfig {
    pub fn timings(&self) -> QueryTimings {
        QueryTimings {
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            deadline_buffer: Duration::from_secs(self.deadline_buffer_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            warmup: Duration::from_millis(self.warmup_ms),
        }
    }

    pub fn gate_step_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_step_timeout_secs)
    }
}

impl SimulatedDeviceEntry {
    pub fn to_device(&self) -> wristlink_core::Device {
        let status = if self.connected {
            DeviceStatus::Connected
        } else {
            DeviceStatus::Available
        };
        wristlink_core::Device::new(DeviceId(self.id), self.name.clone(), status)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config directory including the `Wristlink` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Wristlink"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("wristlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Wristlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
