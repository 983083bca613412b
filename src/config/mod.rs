//! Configuration management
//!
//! This module handles loading and parsing configuration for the gateway.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Session cookie and lifetime configuration
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Session store backend configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Machine-to-machine integration configuration
    #[serde(default)]
    pub integration: IntegrationConfig,
    /// Development login configuration
    #[serde(default)]
    pub dev_auth: DevAuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Backend service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the backend service, without trailing slash
    #[serde(default = "default_service_url")]
    pub url: String,
    /// Timeout for a single proxied request
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            timeout_seconds: default_service_timeout(),
        }
    }
}

fn default_service_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_service_timeout() -> u64 {
    60
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Cookie carrying the citizen session id
    #[serde(default = "default_citizen_cookie_name")]
    pub citizen_cookie_name: String,
    /// Cookie carrying the employee session id
    #[serde(default = "default_employee_cookie_name")]
    pub employee_cookie_name: String,
    /// Idle timeout of a session (and its logout token)
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Whether session cookies carry the `Secure` attribute
    #[serde(default)]
    pub cookie_secure: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            citizen_cookie_name: default_citizen_cookie_name(),
            employee_cookie_name: default_employee_cookie_name(),
            timeout_minutes: default_timeout_minutes(),
            cookie_secure: false,
        }
    }
}

fn default_citizen_cookie_name() -> String {
    "evaka.eugw.session".to_string()
}

fn default_employee_cookie_name() -> String {
    "evaka.employee.session".to_string()
}

fn default_timeout_minutes() -> u64 {
    32
}

/// One week
const MAX_SESSION_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

impl SessionsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache driver (memory or redis)
    #[serde(default)]
    pub driver: CacheDriver,
    /// Redis connection URL (optional)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Maximum number of entries held by the in-memory driver
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: CacheDriver::default(),
            redis_url: None,
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_max_capacity() -> u64 {
    100_000
}

/// Cache driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    /// In-memory cache (default)
    #[default]
    Memory,
    /// Redis cache
    Redis,
}

/// Integration configuration
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Bearer token accepted on integration routes. Routes are closed when unset.
    #[serde(default)]
    pub token: Option<String>,
}

impl std::fmt::Debug for IntegrationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Development login configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevAuthConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `EVAKA_<SECTION>_<KEY>`, e.g.
    /// - EVAKA_SERVER_PORT
    /// - EVAKA_SERVICE_URL
    /// - EVAKA_SESSIONS_TIMEOUT_MINUTES
    /// - EVAKA_CACHE_DRIVER
    /// - EVAKA_INTEGRATION_TOKEN
    /// - EVAKA_DEV_AUTH_ENABLED
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot work at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.timeout_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.timeout_minutes must be greater than zero".to_string(),
            ));
        }
        if self.sessions.timeout_minutes > MAX_SESSION_TIMEOUT_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "sessions.timeout_minutes must be at most {}",
                MAX_SESSION_TIMEOUT_MINUTES
            )));
        }
        for name in [&self.sessions.citizen_cookie_name, &self.sessions.employee_cookie_name] {
            if !is_cookie_name(name) {
                return Err(ConfigError::ValidationError(format!(
                    "'{}' is not a valid cookie name",
                    name
                )));
            }
        }
        if self.sessions.citizen_cookie_name == self.sessions.employee_cookie_name {
            return Err(ConfigError::ValidationError(
                "citizen and employee session cookies must have different names".to_string(),
            ));
        }
        if self.cache.driver == CacheDriver::Redis && self.cache.redis_url.is_none() {
            return Err(ConfigError::ValidationError(
                "cache.redis_url is required when cache.driver is redis".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("EVAKA_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("EVAKA_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(url) = std::env::var("EVAKA_SERVICE_URL") {
            self.service.url = url.trim_end_matches('/').to_string();
        }
        if let Ok(timeout) = std::env::var("EVAKA_SERVICE_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.service.timeout_seconds = timeout;
            }
        }

        if let Ok(name) = std::env::var("EVAKA_SESSIONS_CITIZEN_COOKIE_NAME") {
            self.sessions.citizen_cookie_name = name;
        }
        if let Ok(name) = std::env::var("EVAKA_SESSIONS_EMPLOYEE_COOKIE_NAME") {
            self.sessions.employee_cookie_name = name;
        }
        if let Ok(minutes) = std::env::var("EVAKA_SESSIONS_TIMEOUT_MINUTES") {
            if let Ok(minutes) = minutes.parse::<u64>() {
                self.sessions.timeout_minutes = minutes;
            }
        }
        if let Ok(secure) = std::env::var("EVAKA_SESSIONS_COOKIE_SECURE") {
            if let Some(secure) = parse_bool(&secure) {
                self.sessions.cookie_secure = secure;
            }
        }

        if let Ok(driver) = std::env::var("EVAKA_CACHE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.cache.driver = CacheDriver::Memory,
                "redis" => self.cache.driver = CacheDriver::Redis,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(redis_url) = std::env::var("EVAKA_CACHE_REDIS_URL") {
            self.cache.redis_url = Some(redis_url);
        }
        if let Ok(capacity) = std::env::var("EVAKA_CACHE_MAX_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<u64>() {
                self.cache.max_capacity = capacity;
            }
        }

        if let Ok(token) = std::env::var("EVAKA_INTEGRATION_TOKEN") {
            self.integration.token = Some(token).filter(|t| !t.is_empty());
        }

        if let Ok(enabled) = std::env::var("EVAKA_DEV_AUTH_ENABLED") {
            if let Some(enabled) = parse_bool(&enabled) {
                self.dev_auth.enabled = enabled;
            }
        }
    }
}

/// Cookie names are HTTP tokens
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "EVAKA_SERVER_HOST",
    "EVAKA_SERVER_PORT",
    "EVAKA_SERVICE_URL",
    "EVAKA_SERVICE_TIMEOUT_SECONDS",
    "EVAKA_SESSIONS_CITIZEN_COOKIE_NAME",
    "EVAKA_SESSIONS_EMPLOYEE_COOKIE_NAME",
    "EVAKA_SESSIONS_TIMEOUT_MINUTES",
    "EVAKA_SESSIONS_COOKIE_SECURE",
    "EVAKA_CACHE_DRIVER",
    "EVAKA_CACHE_REDIS_URL",
    "EVAKA_CACHE_MAX_CAPACITY",
    "EVAKA_INTEGRATION_TOKEN",
    "EVAKA_DEV_AUTH_ENABLED",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}
