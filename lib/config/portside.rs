//! Portside configuration types and helpers.

use std::{
    env,
    path::{Path, PathBuf},
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{PortsideError, PortsideResult};

use super::{
    DEFAULT_CACHE_MAX_GB, DEFAULT_LOG_LEVEL, DEFAULT_PROXY_CONCURRENCY, DEFAULT_REGISTRY_NAME,
    DEFAULT_REGISTRY_URL, DEFAULT_SERVER_PORT, DEFAULT_STORAGE_ROOT,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The portside configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct Portside {
    /// The HTTP server settings.
    #[serde(default)]
    #[builder(default)]
    pub(super) server: ServerConfig,

    /// The storage settings.
    #[serde(default)]
    #[builder(default)]
    pub(super) storage: StorageConfig,

    /// The logging settings.
    #[serde(default)]
    #[builder(default)]
    pub(super) logging: LoggingConfig,

    /// The authentication settings.
    #[serde(default)]
    #[builder(default)]
    pub(super) auth: AuthConfig,

    /// The pull-through proxy settings.
    #[serde(default)]
    #[builder(default)]
    pub(super) proxy: ProxyConfig,
}

/// The HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct ServerConfig {
    /// The TCP port the registry listens on.
    #[serde(default = "default_port")]
    #[builder(default = default_port())]
    pub(super) port: u16,
}

/// The storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct StorageConfig {
    /// The root directory all registry state lives under.
    #[serde(default = "default_storage_path")]
    #[builder(default = default_storage_path())]
    pub(super) path: PathBuf,
}

/// The logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct LoggingConfig {
    /// The log level filter, e.g. `info` or `portside=debug`.
    #[serde(default = "default_log_level")]
    #[builder(default = default_log_level())]
    pub(super) level: String,

    /// The log output format.
    #[serde(default)]
    #[builder(default)]
    pub(super) format: LogFormat,
}

/// The log output format.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,

    /// Newline-delimited JSON output.
    Json,
}

/// The authentication settings.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct AuthConfig {
    /// Basic credentials accepted on write requests. An empty list disables
    /// authentication.
    #[serde(default)]
    #[builder(default)]
    pub(super) users: Vec<UserCredential>,
}

/// A single Basic-auth credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct UserCredential {
    /// The account name.
    pub(super) username: String,

    /// The account password.
    pub(super) password: String,
}

/// The pull-through proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct ProxyConfig {
    /// Whether pull-through proxying is enabled at all.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub(super) enabled: bool,

    /// Capacity of the bounded permit pool guarding upstream blob fetches.
    #[serde(default = "default_concurrency")]
    #[builder(default = default_concurrency())]
    pub(super) concurrency: usize,

    /// The cache accounting settings.
    #[serde(default)]
    #[builder(default)]
    pub(super) cache: CacheConfig,

    /// The upstream registries known to the proxy.
    #[serde(default = "default_registries")]
    #[builder(default = default_registries())]
    pub(super) registries: Vec<UpstreamRegistry>,
}

/// The cache accounting settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct CacheConfig {
    /// The cache size ceiling in GiB.
    #[serde(default = "default_cache_max_gb")]
    #[builder(default = default_cache_max_gb())]
    pub(super) max_size_gb: u64,
}

/// An upstream registry the proxy can pull through from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct UpstreamRegistry {
    /// The name clients use in `proxy/<name>/…` repositories.
    pub(super) name: String,

    /// The registry endpoint, e.g. `https://registry-1.docker.io`.
    pub(super) url: String,

    /// Whether this registry handles proxy repositories whose first segment
    /// matches no configured name.
    #[serde(default)]
    #[builder(default)]
    pub(super) default: bool,

    /// Username for the upstream token endpoint, if the registry requires
    /// credentials.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) username: Option<String>,

    /// Password for the upstream token endpoint.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) password: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Portside {
    /// Loads the configuration.
    ///
    /// When `path` is given the file must exist; otherwise built-in defaults
    /// are used. Environment variables override file values afterwards.
    pub fn load(path: Option<&Path>) -> PortsideResult<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(PortsideError::ConfigNotFound(path.to_path_buf()));
                }
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Overrides the server port, e.g. from a CLI flag.
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Applies environment-variable overrides on top of file values.
    ///
    /// Recognised variables: `PORTSIDE_PORT`, `PORTSIDE_STORAGE_PATH`,
    /// `PORTSIDE_LOG_LEVEL`, `PORTSIDE_CACHE_MAX_GB`,
    /// `PORTSIDE_UPSTREAM_USERNAME`, `PORTSIDE_UPSTREAM_PASSWORD` (the last
    /// two apply to the default upstream registry).
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env::var("PORTSIDE_PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }

        if let Ok(path) = env::var("PORTSIDE_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }

        if let Ok(level) = env::var("PORTSIDE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(max_gb) = env::var("PORTSIDE_CACHE_MAX_GB")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.proxy.cache.max_size_gb = max_gb;
        }

        let username = env::var("PORTSIDE_UPSTREAM_USERNAME").ok();
        let password = env::var("PORTSIDE_UPSTREAM_PASSWORD").ok();
        if username.is_some() || password.is_some() {
            if let Some(registry) = self.proxy.registries.iter_mut().find(|r| r.default) {
                if username.is_some() {
                    registry.username = username;
                }
                if password.is_some() {
                    registry.password = password;
                }
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PortsideResult<()> {
        if self.proxy.cache.max_size_gb == 0 {
            return Err(PortsideError::ConfigValidation(
                "proxy.cache.max_size_gb must be greater than 0".to_string(),
            ));
        }

        if self.proxy.concurrency == 0 {
            return Err(PortsideError::ConfigValidation(
                "proxy.concurrency must be greater than 0".to_string(),
            ));
        }

        let defaults = self.proxy.registries.iter().filter(|r| r.default).count();
        if defaults > 1 {
            return Err(PortsideError::ConfigValidation(
                "at most one proxy registry may be marked default".to_string(),
            ));
        }

        for registry in &self.proxy.registries {
            if registry.name.is_empty() || registry.url.is_empty() {
                return Err(PortsideError::ConfigValidation(
                    "proxy registries need both a name and a url".to_string(),
                ));
            }
        }

        for user in &self.auth.users {
            if user.username.is_empty() {
                return Err(PortsideError::ConfigValidation(
                    "auth users need a non-empty username".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl UpstreamRegistry {
    /// Reports whether this registry is Docker Hub, which namespaces
    /// official images under `library/`.
    pub fn is_docker_hub(&self) -> bool {
        self.name == DEFAULT_REGISTRY_NAME || self.url.contains("docker.io")
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            cache: CacheConfig::default(),
            registries: default_registries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_gb: default_cache_max_gb(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_storage_path() -> PathBuf {
    DEFAULT_STORAGE_ROOT.clone()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_PROXY_CONCURRENCY
}

fn default_cache_max_gb() -> u64 {
    DEFAULT_CACHE_MAX_GB
}

fn default_registries() -> Vec<UpstreamRegistry> {
    vec![UpstreamRegistry {
        name: DEFAULT_REGISTRY_NAME.to_string(),
        url: DEFAULT_REGISTRY_URL.to_string(),
        default: true,
        username: None,
        password: None,
    }]
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_are_valid() {
        let config = Portside::default();
        config.validate().unwrap();
        assert_eq!(*config.get_server().get_port(), DEFAULT_SERVER_PORT);
        assert_eq!(
            *config.get_proxy().get_cache().get_max_size_gb(),
            DEFAULT_CACHE_MAX_GB
        );
        assert!(config.get_proxy().get_enabled());
    }

    #[test]
    fn test_config_parses_yaml() {
        let yaml = r#"
server:
  port: 8080
storage:
  path: /srv/registry
logging:
  level: debug
  format: json
auth:
  users:
    - username: admin
      password: secret
proxy:
  enabled: true
  cache:
    max_size_gb: 25
  registries:
    - name: docker.io
      url: https://registry-1.docker.io
      default: true
    - name: ghcr.io
      url: https://ghcr.io
      username: bot
      password: hunter2
"#;
        let config: Portside = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(*config.get_server().get_port(), 8080);
        assert_eq!(
            config.get_storage().get_path(),
            &PathBuf::from("/srv/registry")
        );
        assert_eq!(*config.get_logging().get_format(), LogFormat::Json);
        assert_eq!(config.get_auth().get_users().len(), 1);
        assert_eq!(*config.get_proxy().get_cache().get_max_size_gb(), 25);
        assert_eq!(config.get_proxy().get_registries().len(), 2);
        assert!(config.get_proxy().get_registries()[0].get_default());
    }

    #[test]
    fn test_config_rejects_zero_cache_ceiling() {
        let config = Portside::builder()
            .proxy(
                ProxyConfig::builder()
                    .cache(CacheConfig::builder().max_size_gb(0).build())
                    .build(),
            )
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_two_default_registries() {
        let registry = |name: &str| {
            UpstreamRegistry::builder()
                .name(name.to_string())
                .url(format!("https://{}", name))
                .default(true)
                .build()
        };
        let config = Portside::builder()
            .proxy(
                ProxyConfig::builder()
                    .registries(vec![registry("a.io"), registry("b.io")])
                    .build(),
            )
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_docker_hub_detection() {
        assert!(default_registries()[0].is_docker_hub());
        let other = UpstreamRegistry::builder()
            .name("ghcr.io".to_string())
            .url("https://ghcr.io".to_string())
            .build();
        assert!(!other.is_docker_hub());
    }
}
