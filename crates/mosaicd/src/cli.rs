use std::ffi::OsStr;
use std::path::PathBuf;

use clap::Parser;
use mosaic_config::{GatewayKind, MosaicConfig, StorageBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(author, version, about = "Climate Mosaic analysis service")]
pub struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Workspace root holding .mosaic/config.toml"
    )]
    pub workspace: PathBuf,

    #[arg(long, help = "Listen address override, e.g. 0.0.0.0:3000")]
    pub bind: Option<String>,

    #[arg(
        long,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(long, value_parser = parse_gateway_kind, help = "Analysis provider: http or mock")]
    pub analysis_provider: Option<GatewayKind>,

    #[arg(long, help = "Base URL of the analysis service")]
    pub analysis_url: Option<String>,

    #[arg(long, help = "Seconds a logged analysis is served from cache (0 disables)")]
    pub cache_window_secs: Option<u64>,

    #[arg(long, value_parser = parse_storage_backend, help = "Storage backend: sqlite or postgres")]
    pub storage_backend: Option<StorageBackend>,

    #[arg(long, help = "SQLite file path, relative to the workspace")]
    pub sqlite_path: Option<String>,
}

impl Cli {
    /// CLI flags win over the file and the environment.
    pub fn apply_overrides(&self, mut config: MosaicConfig) -> MosaicConfig {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(provider) = self.analysis_provider {
            config.analysis.provider = provider;
        }
        if let Some(url) = &self.analysis_url {
            config.analysis.service_url = url.clone();
        }
        if let Some(secs) = self.cache_window_secs {
            config.analysis.cache_window_secs = secs;
        }
        if let Some(backend) = self.storage_backend {
            config.storage.backend = backend;
        }
        if let Some(path) = &self.sqlite_path {
            config.storage.sqlite_path = path.clone();
        }
        config
    }
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_gateway_kind(value: &str) -> Result<GatewayKind, String> {
    value.parse()
}

fn parse_storage_backend(value: &str) -> Result<StorageBackend, String> {
    value.parse()
}
