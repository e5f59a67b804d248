//! Configuration resolution for hfx-importer
//!
//! Priority: CLI → ENV → TOML → compiled default. clap resolves CLI and ENV
//! together (`#[arg(env = ...)]`), so this module only layers the result over
//! the TOML file.

use hfx_common::config::{self, ImportConfig, TomlConfig};
use hfx_common::{Error, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::models::ImportSettings;

/// Values given on the command line or through `HFX_*` variables
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
    pub log_level: Option<String>,
    pub ingest_url: Option<String>,
}

/// Where the TOML layer came from, reported once logging is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// No `--config`, no `HFX_CONFIG` and no platform config directory
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Missing(path) => write!(f, "{} (not found, using defaults)", path.display()),
            ConfigSource::Defaults => write!(f, "compiled defaults"),
        }
    }
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
    pub log_level: String,
    pub import: ImportConfig,
    pub source: ConfigSource,
}

impl ServiceConfig {
    /// Resolve CLI overrides over the TOML file and defaults
    ///
    /// Fails on a malformed config file or invalid import settings.
    pub fn resolve(cli: CliOverrides) -> Result<Self> {
        let (toml, source) = match config::resolve_config_path(cli.config.as_deref()) {
            Some(path) if path.exists() => (config::load_toml_config(&path)?, ConfigSource::File(path)),
            Some(path) => (TomlConfig::default(), ConfigSource::Missing(path)),
            None => (TomlConfig::default(), ConfigSource::Defaults),
        };
        Self::layer(cli, toml, source)
    }

    /// Apply overrides to an already-loaded TOML model
    pub fn layer(cli: CliOverrides, toml: TomlConfig, source: ConfigSource) -> Result<Self> {
        let host = cli.host.unwrap_or(toml.server.host);
        let port = cli.port.unwrap_or(toml.server.port);
        let listen_addr = parse_listen_addr(&host, port)?;

        let database_path = cli
            .database
            .or(toml.database_path)
            .unwrap_or_else(config::default_database_path);

        let mut import = toml.import;
        if cli.ingest_url.is_some() {
            import.ingest_url = cli.ingest_url;
        }
        import.ingest_url = import.ingest_url.filter(|url| !url.trim().is_empty());
        import.validate()?;

        Ok(Self {
            listen_addr,
            database_path,
            log_level: cli.log_level.unwrap_or(toml.logging.level),
            import,
            source,
        })
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings::from(&self.import)
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }
}

fn parse_listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .or_else(|_| format!("[{}]:{}", host, port).parse::<SocketAddr>())
        .map_err(|e| Error::Config(format!("invalid listen address {}:{}: {}", host, port, e)))
}
