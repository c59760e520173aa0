use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    #[serde(
        default = "default_cpu_window",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub cpu_window: Duration,
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
    #[serde(default = "default_disk_mount")]
    pub disk_mount: String,
    #[serde(default)]
    pub include_key_in_payload: bool,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_container_id_env")]
    pub container_id_env: String,
}

/// Payload variant: which identifiers are attached and how metric fields are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Basic,
    Tenant,
    #[default]
    Full,
}

impl Profile {
    pub fn requires_tenant_id(self) -> bool {
        matches!(self, Profile::Tenant | Profile::Full)
    }

    pub fn requires_container_id(self) -> bool {
        matches!(self, Profile::Full)
    }

    pub fn includes_processes(self) -> bool {
        matches!(self, Profile::Full)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Basic => "basic",
            Profile::Tenant => "tenant",
            Profile::Full => "full",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            profile: Profile::default(),
            interval: default_interval(),
            cpu_window: default_cpu_window(),
            top_processes: default_top_processes(),
            disk_mount: default_disk_mount(),
            include_key_in_payload: false,
            listen: None,
            api_key_env: default_api_key_env(),
            container_id_env: default_container_id_env(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
    #[error("{0} is not set")]
    MissingApiKey(String),
    #[error("{0} is not set, profile 'full' needs a container id")]
    MissingContainerId(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        if !endpoint.starts_with("ws://") || endpoint.len() <= "ws://".len() {
            return Err(ConfigError::Validation(
                "endpoint must be a ws:// URL".to_string(),
            ));
        }
        if self.interval < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "interval must be >= 1s".to_string(),
            ));
        }
        if self.cpu_window.is_zero() || self.cpu_window >= self.interval {
            return Err(ConfigError::Validation(
                "cpu_window must be > 0 and shorter than interval".to_string(),
            ));
        }
        if !(1..=100).contains(&self.top_processes) {
            return Err(ConfigError::Validation(
                "top_processes must be in the range 1..100".to_string(),
            ));
        }
        if self.disk_mount.trim().is_empty() {
            return Err(ConfigError::Validation(
                "disk_mount must not be empty".to_string(),
            ));
        }
        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen).is_err() {
                return Err(ConfigError::Validation(
                    "listen must be a valid host:port address".to_string(),
                ));
            }
        }
        if self.api_key_env.trim().is_empty() || self.container_id_env.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api_key_env and container_id_env must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

/// Secrets and operator identifiers sourced from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub container_id: Option<String>,
}

impl Credentials {
    pub fn from_env(cfg: &Config) -> Result<Self, ConfigError> {
        Self::resolve(cfg, |name| std::env::var(name).ok())
    }

    /// Blank values count as missing.
    pub fn resolve(
        cfg: &Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = read(&cfg.api_key_env)
            .ok_or_else(|| ConfigError::MissingApiKey(cfg.api_key_env.clone()))?;
        let container_id = read(&cfg.container_id_env);
        if cfg.profile.requires_container_id() && container_id.is_none() {
            return Err(ConfigError::MissingContainerId(
                cfg.container_id_env.clone(),
            ));
        }

        Ok(Self {
            api_key,
            container_id,
        })
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn default_endpoint() -> String {
    "ws://localhost:8000/api/v1/public/monitoring".to_string()
}

const fn default_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_cpu_window() -> Duration {
    Duration::from_secs(1)
}

const fn default_top_processes() -> usize {
    5
}

fn default_disk_mount() -> String {
    "/".to_string()
}

fn default_api_key_env() -> String {
    "SERVER_API_KEY".to_string()
}

fn default_container_id_env() -> String {
    "CONTAINERID".to_string()
}
