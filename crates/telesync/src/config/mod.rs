mod credentials;

pub use credentials::CredentialStore;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::models::Feature;
use crate::error::{Result, SyncError};

/// Default configuration directory name
const CONFIG_DIR_NAME: &str = "telesync";

/// Configuration file name inside the config directory
const CONFIG_FILENAME: &str = "config.json";

/// Platform floor for periodic background work
pub const MIN_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Longest interval accepted anywhere
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Get the configuration directory path
/// Returns ~/.config/telesync on Unix, ~/Library/Application Support/telesync on macOS
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(CONFIG_DIR_NAME))
        .ok_or_else(|| SyncError::config("Could not determine config directory"))
}

/// Get the data directory path for the ledger and tokens
/// Returns ~/.local/share/telesync on Unix, ~/Library/Application Support/telesync on macOS
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|p| p.join(CONFIG_DIR_NAME))
        .ok_or_else(|| SyncError::config("Could not determine data directory"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Parse an interval such as `30s`, `15m` or `1h`, up to [`MAX_INTERVAL`]
pub fn parse_interval(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SyncError::invalid_param("Interval is required"));
    }

    let unit_len = input.chars().last().map(char::len_utf8).unwrap_or(0);
    let (number_part, unit) = input.split_at(input.len() - unit_len);
    let value: u64 = number_part.parse().map_err(|_| {
        SyncError::invalid_param("Interval must be a number followed by s, m, or h")
    })?;

    if value == 0 {
        return Err(SyncError::invalid_param("Interval must be greater than 0"));
    }

    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(SyncError::invalid_param(
                "Interval must end with s, m, or h",
            ))
        }
    };

    match value.checked_mul(scale).map(Duration::from_secs) {
        Some(interval) if interval <= MAX_INTERVAL => Ok(interval),
        _ => Err(SyncError::invalid_param(format!(
            "Interval must be at most {}",
            format_interval(MAX_INTERVAL)
        ))),
    }
}

/// Render a duration in the same syntax [`parse_interval`] accepts
pub fn format_interval(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod interval_serde {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_interval(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_interval(&raw).map_err(de::Error::custom)
    }
}

/// Shell command acting as the OS-level provider for a feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Provider commands per feature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub steps: Option<CommandConfig>,
    pub location: Option<CommandConfig>,
}

impl ProviderConfig {
    pub fn for_feature(&self, feature: Feature) -> Option<&CommandConfig> {
        match feature {
            Feature::Steps => self.steps.as_ref(),
            Feature::Location => self.location.as_ref(),
        }
    }
}

/// Application configuration, read from `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the remote key-value store
    pub remote_url: String,
    /// How long a sampler waits for its first valid value
    #[serde(with = "interval_serde")]
    pub sample_timeout: Duration,
    /// Hard cap on a whole sample-and-push cycle
    #[serde(with = "interval_serde")]
    pub cycle_timeout: Duration,
    /// Delay before re-arming features after boot
    #[serde(with = "interval_serde")]
    pub boot_delay: Duration,
    /// Interval given to a feature when it is first enabled
    #[serde(with = "interval_serde")]
    pub default_interval: Duration,
    /// Accept intervals below [`MIN_INTERVAL`]
    pub allow_short_intervals: bool,
    /// Whether the platform forbids starting foreground work from the background
    pub os_restricts_background_start: bool,
    pub providers: ProviderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:8080".to_string(),
            sample_timeout: Duration::from_secs(20),
            cycle_timeout: Duration::from_secs(30),
            boot_delay: Duration::from_secs(60),
            default_interval: MIN_INTERVAL,
            allow_short_intervals: false,
            os_restricts_background_start: true,
            providers: ProviderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(CONFIG_FILENAME))
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path()?)
    }

    /// Load from a file, falling back to defaults if it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&json).map_err(|e| {
            SyncError::config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.remote_url.trim().is_empty() {
            return Err(SyncError::config("remote_url must not be empty"));
        }
        if self.sample_timeout > self.cycle_timeout {
            return Err(SyncError::config(
                "sample_timeout must not exceed cycle_timeout",
            ));
        }
        Ok(())
    }

    /// Apply the platform floor to a requested interval
    pub fn effective_interval(&self, requested: Duration) -> Duration {
        if self.allow_short_intervals {
            requested
        } else {
            requested.max(MIN_INTERVAL)
        }
    }
}
