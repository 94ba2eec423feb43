use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tokenvault_storage::keyring_backend::DEFAULT_MAX_VALUE_LEN;

const DEFAULT_SERVICE: &str = "tokenvault";
const SERVICE_ENV: &str = "TOKENVAULT_KEYRING_SERVICE";

/// User-level configuration loaded from `~/.config/tokenvault/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the directory holding encrypted records.
    pub data_dir: Option<PathBuf>,
    /// Keyring settings for encryption keys and legacy entries.
    pub keyring: Option<KeyringConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service: Option<String>,
    /// Service the pre-encryption build wrote plaintext entries under.
    pub legacy_service: Option<String>,
    pub max_value_len: Option<usize>,
}

/// Keyring settings with defaults and environment overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeyring {
    pub service: String,
    pub legacy_service: String,
    pub max_value_len: usize,
}

impl Config {
    pub fn resolve_keyring(&self) -> ResolvedKeyring {
        self.resolve_keyring_with(std::env::var(SERVICE_ENV).ok())
    }

    fn resolve_keyring_with(&self, env_service: Option<String>) -> ResolvedKeyring {
        let keyring = self.keyring.clone().unwrap_or_default();
        let service = env_service
            .or(keyring.service)
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string());
        let legacy_service = keyring
            .legacy_service
            .unwrap_or_else(|| service.clone());

        ResolvedKeyring {
            service,
            legacy_service,
            max_value_len: keyring.max_value_len.unwrap_or(DEFAULT_MAX_VALUE_LEN),
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("tokenvault").join("config.toml"))
}

/// Write the config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
