//! Configuration loading and validation for the healthcheck UI service

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use validator::{Validate, ValidationError, ValidationErrors};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "HEALTHCHECK_UI_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub collector: CollectorSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub endpoints: Vec<EndpointSettings>,

    #[serde(default)]
    pub webhooks: Vec<WebhookSettings>,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.server.validate()?;
        self.collector.validate()?;
        self.api.validate()?;
        for endpoint in &self.endpoints {
            endpoint.validate()?;
        }
        for webhook in &self.webhooks {
            webhook.validate()?;
        }

        let mut errors = ValidationErrors::new();
        let mut valid = true;

        let mut seen = HashSet::new();
        if self
            .endpoints
            .iter()
            .any(|e| !seen.insert(e.name.trim().to_ascii_lowercase()))
        {
            errors.add("endpoints", ValidationError::new("duplicate_endpoint_name"));
            valid = false;
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.as_os_str().is_empty() {
            errors.add("storage", ValidationError::new("sqlite_path_empty"));
            valid = false;
        }

        if valid { Ok(()) } else { Err(errors) }
    }
}

/// API server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,

    /// Concurrent API requests allowed before answering 429 (0 = unlimited)
    pub max_active_requests: usize,
}

/// Poll loop settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CollectorSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_evaluation_interval")]
    pub evaluation_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_request_timeout")]
    pub request_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Status store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    pub path: PathBuf,
}

/// Read API settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApiSettings {
    #[validate(range(min = 1, max = 100000))]
    pub max_history_per_endpoint: usize,
}

/// A statically configured endpoint to poll
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EndpointSettings {
    #[validate(custom = "validate_name")]
    pub name: String,

    #[validate(custom = "validate_endpoint_uri")]
    pub uri: String,
}

/// A webhook sink for failure and recovery notifications
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebhookSettings {
    #[validate(custom = "validate_name")]
    pub name: String,

    #[validate(custom = "validate_endpoint_uri")]
    pub uri: String,

    #[serde(default)]
    pub payload: String,

    #[serde(default)]
    pub restore_payload: String,
}

/// Notification suppression settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Re-send an unchanged notification once this much time has passed since
    /// the last one. Unset means notify once until the state changes.
    #[serde(default, with = "humantime_serde")]
    pub repeat_after: Option<Duration>,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Prometheus metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5000".to_string(),
            max_active_requests: 0,
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: default_sqlite_path(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            max_history_per_endpoint: 100,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("healthchecks.db")
}

// Custom validators

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.trim()
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_evaluation_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) {
        return Err(ValidationError::new("evaluation_interval_below_minimum"));
    }
    Ok(())
}

fn validate_request_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let secs = timeout.as_secs_f64();
    if !(1.0..=300.0).contains(&secs) {
        return Err(ValidationError::new("request_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new("name_empty"));
    }
    Ok(())
}

fn validate_endpoint_uri(uri: &str) -> Result<(), ValidationError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("uri_empty"));
    }

    match Url::parse(trimmed) {
        Ok(url) if crate::uri::is_http_endpoint(&url) => Ok(()),
        Ok(_) => Err(ValidationError::new("uri_unsupported_scheme")),
        // Relative to the service's own address
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(()),
        Err(_) => Err(ValidationError::new("uri_invalid")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `HEALTHCHECK_UI_CONFIG` or the default search paths
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
    }

    /// Load configuration from an explicit path, falling back to the search paths
    pub fn load_with(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/healthcheck-ui/config.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./healthcheck-ui.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/healthcheck-ui/config.yaml"))
    }
}
