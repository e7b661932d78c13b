use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chemkg: ChemkgConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Paths and logging
#[derive(Debug, Clone, Deserialize)]
pub struct ChemkgConfig {
    /// Directory where computation output files are dropped.
    pub watch_dir: PathBuf,
    /// Append-only knowledge store file.
    pub store_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Directory watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            debounce_ms: default_debounce_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// External parser program configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_parser_command")]
    pub command: String,
    #[serde(default = "default_parser_args")]
    pub args: Vec<String>,
    #[serde(default = "default_parser_timeout_ms")]
    pub timeout_ms: u64,
    /// Tag passed to the parser in the ingestion metadata.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
}

impl ParserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            command: default_parser_command(),
            args: default_parser_args(),
            timeout_ms: default_parser_timeout_ms(),
            source_tag: default_source_tag(),
        }
    }
}

/// Query layer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_hartree_tolerance")]
    pub hartree_tolerance: f64,
    #[serde(default = "default_ev_tolerance")]
    pub ev_tolerance: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            hartree_tolerance: default_hartree_tolerance(),
            ev_tolerance: default_ev_tolerance(),
            search_limit: default_search_limit(),
        }
    }
}

/// HTTP query server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["log".to_string(), "out".to_string()]
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_channel_capacity() -> usize {
    256
}

fn default_parser_command() -> String {
    "python3".to_string()
}

fn default_parser_args() -> Vec<String> {
    vec!["py/parse_gaussian_cclib.py".to_string()]
}

fn default_parser_timeout_ms() -> u64 {
    120_000
}

fn default_source_tag() -> String {
    "chemkg-watcher".to_string()
}

fn default_hartree_tolerance() -> f64 {
    1e-6
}

fn default_ev_tolerance() -> f64 {
    1e-3
}

fn default_search_limit() -> usize {
    10
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8087
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in CHEMKG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("CHEMKG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.chemkg.watch_dir.as_os_str().is_empty() {
            anyhow::bail!("chemkg.watch_dir must not be empty");
        }

        if self.chemkg.store_path.as_os_str().is_empty() {
            anyhow::bail!("chemkg.store_path must not be empty");
        }

        if self.chemkg.watch_dir.is_file() {
            anyhow::bail!(
                "watch_dir must be a directory, not a file: {}",
                self.chemkg.watch_dir.display()
            );
        }

        if self.watch.extensions.iter().all(|e| e.trim().is_empty()) {
            anyhow::bail!("watch.extensions must list at least one extension");
        }

        if self.watch.channel_capacity == 0 {
            anyhow::bail!("watch.channel_capacity must be greater than 0");
        }

        if self.parser.command.trim().is_empty() {
            anyhow::bail!("parser.command must not be empty");
        }

        if self.parser.timeout_ms == 0 {
            anyhow::bail!("parser.timeout_ms must be greater than 0");
        }

        if !(self.query.hartree_tolerance > 0.0) || !(self.query.ev_tolerance > 0.0) {
            anyhow::bail!("query tolerances must be greater than 0");
        }

        if self.query.search_limit == 0 {
            anyhow::bail!("query.search_limit must be greater than 0");
        }

        Ok(())
    }

    /// Get the watched directory
    pub fn watch_dir(&self) -> &Path {
        &self.chemkg.watch_dir
    }

    /// Get the knowledge store path
    pub fn store_path(&self) -> &Path {
        &self.chemkg.store_path
    }

    /// Normalized extension allow-list: lowercase, no leading dot
    pub fn extensions(&self) -> Vec<String> {
        self.watch
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}
