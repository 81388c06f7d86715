use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MOSAIC_DIR_NAME: &str = ".mosaic";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_ANALYSIS_SERVICE_URL: &str = "http://localhost:8000";
pub const DEFAULT_CACHE_WINDOW_SECS: u64 = 10 * 60;
pub const DEFAULT_SQLITE_PATH: &str = ".mosaic/mosaic.sqlite";
pub const DEFAULT_DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const ANALYSIS_SERVICE_URL_ENV: &str = "QUANTUM_API_URL";
pub const PORT_ENV: &str = "PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    #[default]
    Http,
    Mock,
}

impl GatewayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Mock => "mock",
        }
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "http" => Ok(Self::Http),
            "mock" => Ok(Self::Mock),
            other => Err(format!(
                "invalid analysis provider '{other}', expected one of: http, mock"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Postgres,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!(
                "invalid storage backend '{other}', expected one of: sqlite, postgres"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MosaicConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub provider: GatewayKind,
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_cache_window_secs")]
    pub cache_window_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: GatewayKind::Http,
            service_url: default_service_url(),
            cache_window_secs: default_cache_window_secs(),
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,
    /// Resolved from `database_url_env` at startup; never written to disk.
    #[serde(skip)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: default_sqlite_path(),
            database_url_env: default_database_url_env(),
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn mosaic_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(MOSAIC_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    mosaic_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<MosaicConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(MosaicConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: MosaicConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<MosaicConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(mosaic_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = MosaicConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Applies process-environment overrides once, at startup. `lookup` is
/// `std::env::var(..).ok()` in the daemon and a fixed map in tests.
pub fn apply_env_overrides<F>(mut config: MosaicConfig, lookup: F) -> MosaicConfig
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| normalize_optional(lookup(name));

    if let Some(url) = read(ANALYSIS_SERVICE_URL_ENV) {
        config.analysis.service_url = url;
    }

    if let Some(port) = read(PORT_ENV).and_then(|value| value.parse::<u16>().ok()) {
        config.server.bind = replace_port(&config.server.bind, port);
    }

    config.storage.database_url = read(&config.storage.database_url_env);
    config
}

pub fn validate_config(config: &MosaicConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.analysis.provider == GatewayKind::Http
        && !(config.analysis.service_url.starts_with("http://")
            || config.analysis.service_url.starts_with("https://"))
    {
        warnings.push(ConfigWarning {
            code: "analysis_url_scheme",
            message: format!(
                "analysis.service_url '{}' has no http(s) scheme; upstream calls will fail",
                config.analysis.service_url
            ),
        });
    }

    if config.analysis.cache_window_secs == 0 {
        warnings.push(ConfigWarning {
            code: "cache_disabled",
            message: "analysis.cache_window_secs is 0; every request goes upstream".to_owned(),
        });
    }

    if config.analysis.request_timeout_ms == Some(0) {
        warnings.push(ConfigWarning {
            code: "timeout_zero",
            message: "analysis.request_timeout_ms is 0; it will be ignored".to_owned(),
        });
    }

    if config.storage.backend == StorageBackend::Postgres && config.storage.database_url.is_none()
    {
        warnings.push(ConfigWarning {
            code: "database_url_missing",
            message: format!(
                "storage.backend is postgres but {} is unset; every query will fail",
                config.storage.database_url_env
            ),
        });
    }

    warnings
}

fn replace_port(bind: &str, port: u16) -> String {
    let host = bind
        .rsplit_once(':')
        .map(|(host, _)| host)
        .filter(|host| !host.is_empty())
        .unwrap_or("0.0.0.0");
    format!("{host}:{port}")
}

fn default_bind() -> String {
    DEFAULT_BIND.to_owned()
}

fn default_service_url() -> String {
    DEFAULT_ANALYSIS_SERVICE_URL.to_owned()
}

fn default_cache_window_secs() -> u64 {
    DEFAULT_CACHE_WINDOW_SECS
}

fn default_sqlite_path() -> String {
    DEFAULT_SQLITE_PATH.to_owned()
}

fn default_database_url_env() -> String {
    DEFAULT_DATABASE_URL_ENV.to_owned()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: MosaicConfig) -> MosaicConfig {
    let bind = config.server.bind.trim();
    config.server.bind = if bind.is_empty() {
        default_bind()
    } else {
        bind.to_owned()
    };

    let service_url = config.analysis.service_url.trim().trim_end_matches('/');
    config.analysis.service_url = if service_url.is_empty() {
        default_service_url()
    } else {
        service_url.to_owned()
    };

    let sqlite_path = config.storage.sqlite_path.trim();
    config.storage.sqlite_path = if sqlite_path.is_empty() {
        default_sqlite_path()
    } else {
        sqlite_path.to_owned()
    };

    let database_url_env = config.storage.database_url_env.trim();
    config.storage.database_url_env = if database_url_env.is_empty() {
        default_database_url_env()
    } else {
        database_url_env.to_owned()
    };

    config
}
