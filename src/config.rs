//! Configuration management for resauth
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ResauthError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for the authorization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// OAuth client identity presented to authorization servers
    #[serde(default)]
    pub oauth: OAuthClientConfig,

    /// Outbound HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Operational limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Credential store location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Public base URL of this engine, used to build redirect URIs.
    /// Must match what authorization servers can reach.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Route prefix the engine is mounted under
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// User credentials are stored under when no `x-resauth-user`
    /// header is present
    #[serde(default = "default_user")]
    pub default_user: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_path_prefix() -> String {
    "/oauth".to_string()
}

fn default_user() -> String {
    "default".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            base_url: default_base_url(),
            path_prefix: default_path_prefix(),
            default_user: default_user(),
        }
    }
}

/// OAuth client identity configuration
///
/// `client_name` is sent in dynamic registration requests. `app_uri`
/// enables the client-ID-metadata-document strategy: when set, servers
/// that support it receive `{app_uri}{path_prefix}/client-metadata.json`
/// as the client ID and no registration round trip happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    /// Client name shown on authorization server consent screens
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Public URI of the application embedding this engine
    #[serde(default)]
    pub app_uri: Option<String>,

    /// Logo shown on consent screens
    #[serde(default)]
    pub logo_uri: Option<String>,
}

fn default_client_name() -> String {
    "resauth".to_string()
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            app_uri: None,
            logo_uri: None,
        }
    }
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout applied to every outbound call (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Operational limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Cap on bytes kept from any single fetched context document
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: usize,
}

fn default_max_fetch_bytes() -> usize {
    512 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_fetch_bytes: default_max_fetch_bytes(),
        }
    }
}

/// Credential store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Filesystem path of the embedded store. Defaults to the user's
    /// application data directory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ResauthError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ResauthError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(listen_addr) = std::env::var("RESAUTH_LISTEN_ADDR") {
            self.server.listen_addr = listen_addr;
            tracing::debug!("Env override: RESAUTH_LISTEN_ADDR");
        }

        if let Ok(base_url) = std::env::var("RESAUTH_BASE_URL") {
            self.server.base_url = base_url;
            tracing::debug!("Env override: RESAUTH_BASE_URL");
        }

        if let Ok(path_prefix) = std::env::var("RESAUTH_PATH_PREFIX") {
            self.server.path_prefix = path_prefix;
            tracing::debug!("Env override: RESAUTH_PATH_PREFIX");
        }

        if let Ok(default_user) = std::env::var("RESAUTH_DEFAULT_USER") {
            self.server.default_user = default_user;
            tracing::debug!("Env override: RESAUTH_DEFAULT_USER");
        }

        if let Ok(client_name) = std::env::var("RESAUTH_CLIENT_NAME") {
            self.oauth.client_name = client_name;
            tracing::debug!("Env override: RESAUTH_CLIENT_NAME");
        }

        if let Ok(app_uri) = std::env::var("RESAUTH_APP_URI") {
            self.oauth.app_uri = Some(app_uri);
            tracing::debug!("Env override: RESAUTH_APP_URI");
        }

        if let Ok(logo_uri) = std::env::var("RESAUTH_LOGO_URI") {
            self.oauth.logo_uri = Some(logo_uri);
            tracing::debug!("Env override: RESAUTH_LOGO_URI");
        }

        if let Ok(timeout) = std::env::var("RESAUTH_HTTP_TIMEOUT_SECONDS") {
            match timeout.parse::<u64>() {
                Ok(v) => {
                    self.http.timeout_seconds = v;
                    tracing::debug!(
                        timeout_seconds = v,
                        "Env override: RESAUTH_HTTP_TIMEOUT_SECONDS"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for RESAUTH_HTTP_TIMEOUT_SECONDS: {}",
                        timeout
                    );
                }
            }
        }

        if let Ok(max_bytes) = std::env::var("RESAUTH_MAX_FETCH_BYTES") {
            match max_bytes.parse::<usize>() {
                Ok(v) => {
                    self.limits.max_fetch_bytes = v;
                    tracing::debug!(max_fetch_bytes = v, "Env override: RESAUTH_MAX_FETCH_BYTES");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for RESAUTH_MAX_FETCH_BYTES: {}", max_bytes);
                }
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(ref listen) = cli.listen {
            self.server.listen_addr = listen.clone();
            tracing::debug!(listen_addr = %listen, "CLI override: --listen");
        }
        if let Some(ref kv_path) = cli.kv_path {
            self.storage.path = Some(kv_path.clone());
            tracing::debug!(path = %kv_path.display(), "CLI override: --kv-path");
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set.
    ///
    /// # Returns
    ///
    /// Returns Ok if configuration is valid
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(ResauthError::Config(
                "server.listen_addr cannot be empty".to_string(),
            ));
        }

        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(ResauthError::Config(format!(
                "server.base_url must be an http(s) URL, got: {}",
                self.server.base_url
            )));
        }
        url::Url::parse(&self.server.base_url)
            .map_err(|e| ResauthError::Config(format!("server.base_url is invalid: {}", e)))?;

        if !self.server.path_prefix.is_empty() {
            if !self.server.path_prefix.starts_with('/') {
                return Err(ResauthError::Config(
                    "server.path_prefix must start with '/'".to_string(),
                ));
            }
            if self.server.path_prefix.ends_with('/') {
                return Err(ResauthError::Config(
                    "server.path_prefix must not end with '/'".to_string(),
                ));
            }
        }

        if self.server.default_user.is_empty() {
            return Err(ResauthError::Config(
                "server.default_user cannot be empty".to_string(),
            ));
        }

        if self.oauth.client_name.is_empty() {
            return Err(ResauthError::Config(
                "oauth.client_name cannot be empty".to_string(),
            ));
        }

        if let Some(ref app_uri) = self.oauth.app_uri {
            if !app_uri.starts_with("http://") && !app_uri.starts_with("https://") {
                return Err(ResauthError::Config(format!(
                    "oauth.app_uri must be an http(s) URL, got: {}",
                    app_uri
                )));
            }
        }

        if self.http.timeout_seconds == 0 {
            return Err(ResauthError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.limits.max_fetch_bytes == 0 {
            return Err(ResauthError::Config(
                "limits.max_fetch_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            oauth: OAuthClientConfig::default(),
            http: HttpConfig::default(),
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8765");
        assert_eq!(config.server.path_prefix, "/oauth");
        assert_eq!(config.server.default_user, "default");
        assert_eq!(config.oauth.client_name, "resauth");
        assert_eq!(config.http.timeout_seconds, 30);
        assert_eq!(config.limits.max_fetch_bytes, 512 * 1024);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_base_url() {
        let mut config = Config::default();
        config.server.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.server.base_url = "https://valid.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_prefix() {
        let mut config = Config::default();
        config.server.path_prefix = "oauth".to_string();
        assert!(config.validate().is_err());

        config.server.path_prefix = "/oauth/".to_string();
        assert!(config.validate().is_err());

        config.server.path_prefix = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_empty_user() {
        let mut config = Config::default();
        config.server.default_user = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_zero_timeout() {
        let mut config = Config::default();
        config.http.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_app_uri() {
        let mut config = Config::default();
        config.oauth.app_uri = Some("not-a-url".to_string());
        assert!(config.validate().is_err());

        config.oauth.app_uri = Some("https://app.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parses_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
  base_url: "https://engine.example.com"
  path_prefix: "/auth"
  default_user: "svc"
oauth:
  client_name: "My Engine"
  app_uri: "https://app.example.com"
http:
  timeout_seconds: 10
limits:
  max_fetch_bytes: 1024
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.server.base_url, "https://engine.example.com");
        assert_eq!(config.server.path_prefix, "/auth");
        assert_eq!(config.server.default_user, "svc");
        assert_eq!(config.oauth.client_name, "My Engine");
        assert_eq!(
            config.oauth.app_uri.as_deref(),
            Some("https://app.example.com")
        );
        assert_eq!(config.http.timeout_seconds, 10);
        assert_eq!(config.limits.max_fetch_bytes, 1024);
    }

    #[test]
    fn test_config_partial_yaml_uses_defaults() {
        let yaml = r#"
server:
  base_url: "https://engine.example.com"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.base_url, "https://engine.example.com");
        assert_eq!(config.server.listen_addr, "127.0.0.1:8765");
        assert_eq!(config.oauth.client_name, "resauth");
    }
}
