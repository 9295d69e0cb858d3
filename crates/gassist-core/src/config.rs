//! Configuration management for gassist

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// OAuth and token storage settings
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Attachment delivery server settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// OAuth settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Google client secrets file ("Desktop app" download from the Cloud Console)
    #[serde(default = "default_client_secrets_path")]
    pub client_secrets_path: PathBuf,

    /// Directory holding one token file per scope set
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,

    /// Fixed port for the authorization callback. Must match the redirect URI
    /// registered with Google, so it is never negotiated.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,

    /// How long to wait for the browser consent flow (seconds)
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,

    /// Authorization endpoint
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,

    /// Token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_secrets_path: default_client_secrets_path(),
            token_dir: default_token_dir(),
            callback_port: default_callback_port(),
            callback_timeout_secs: default_callback_timeout(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
        }
    }
}

/// Attachment delivery server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Host name used in download links
    #[serde(default = "default_host")]
    pub host: String,

    /// Address the listener binds and probes
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// First port tried
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Number of consecutive ports tried before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u16,

    /// Directory downloaded attachments are written to and served from
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            bind_address: default_bind_address(),
            base_port: default_base_port(),
            max_attempts: default_max_attempts(),
            download_dir: default_download_dir(),
        }
    }
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Total request timeout (seconds)
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Connect timeout (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    get_data_dir()
}

fn default_client_secrets_path() -> PathBuf {
    get_config_dir().join("credentials.json")
}

fn default_token_dir() -> PathBuf {
    get_data_dir().join("tokens")
}

fn default_callback_port() -> u16 {
    8080
}

fn default_callback_timeout() -> u64 {
    300
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    8000
}

fn default_max_attempts() -> u16 {
    10
}

fn default_download_dir() -> PathBuf {
    get_data_dir().join("downloads")
}

fn default_http_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Get the data directory (XDG: ~/.local/share/gassist)
fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("gassist")
}

/// Get the config directory (XDG: ~/.config/gassist)
pub fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gassist")
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = get_config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            info!("Loaded configuration from {:?}", path);
            config.validate()?;
            Ok(config)
        } else {
            info!("No config file found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                field: "delivery.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.delivery_port_range().contains(&self.oauth.callback_port) {
            return Err(Error::InvalidConfig {
                field: "oauth.callback_port".to_string(),
                reason: format!(
                    "{} lies inside the delivery port range {}..{}",
                    self.oauth.callback_port,
                    self.delivery.base_port,
                    self.delivery_port_range().end
                ),
            });
        }

        Ok(())
    }

    /// Ports the delivery server may probe
    pub fn delivery_port_range(&self) -> std::ops::Range<u16> {
        let start = self.delivery.base_port;
        start..start.saturating_add(self.delivery.max_attempts)
    }

    /// Get the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.general.data_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.oauth.callback_port, 8080);
        assert_eq!(config.delivery.base_port, 8000);
        assert_eq!(config.delivery.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_callback_port_inside_delivery_range_is_rejected() {
        let mut config = Config::default();
        config.oauth.callback_port = 8005;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref field, .. } if field == "oauth.callback_port"));

        // 8010 is the first port past the range
        config.oauth.callback_port = 8010;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[delivery]\nbase_port = 9100\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.delivery.base_port, 9100);
        assert_eq!(config.delivery.max_attempts, 10);
        assert_eq!(config.oauth.callback_port, 8080);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.general.log_level = "debug".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.general.log_level, "debug");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.http.timeout_secs, 30);
    }
}
