//! Server configuration, loaded from a TOML file.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3000"
//!
//! [engine]
//! acceptance_threshold = 0.85
//!
//! [storage]
//! backend = "lmdb"
//! path = "/var/lib/bronzeline"
//!
//! [catalog]
//! snapshot = "catalog.json"
//!
//! [[connections]]
//! alias = "erp"
//! tier = "source"
//! ```

use bronzeline_core::{ConnectionConfig, ConnectionRegistry, EngineConfig, LineageError};
use bronzeline_llm::{AnalyzerConfig, AnalyzerProvider};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: String,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Lmdb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// LMDB directory. Required for the lmdb backend.
    pub path: Option<PathBuf>,
    pub max_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            max_size_mb: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// JSON catalog snapshot. Without one every connection reports as
    /// unavailable.
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or BRONZELINE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error(transparent)]
    Engine(#[from] LineageError),
}

impl ServerConfig {
    /// Load from `--config <path>` or `BRONZELINE_CONFIG`, apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let mut config = Self::from_path(&path)?;
        config.engine = config.engine.with_env_overrides();
        config.analyzer = config.analyzer.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.engine.validate()?;
        self.registry()?;

        if self.storage.backend == StorageBackend::Lmdb && self.storage.path.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "storage.path",
                reason: "required for the lmdb backend".to_string(),
            });
        }
        if self.storage.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }

        match self.analyzer.provider {
            AnalyzerProvider::Disabled => {}
            AnalyzerProvider::OpenAi | AnalyzerProvider::AzureOpenAi => {
                if self.analyzer.model.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "analyzer.model",
                        reason: "must not be empty".to_string(),
                    });
                }
                if self.analyzer.requests_per_minute == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "analyzer.requests_per_minute",
                        reason: "must be > 0".to_string(),
                    });
                }
            }
        }
        if self.analyzer.provider == AnalyzerProvider::AzureOpenAi && self.analyzer.endpoint.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "analyzer.endpoint",
                reason: "required for azure_openai".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "server.bind",
                reason: format!("{}: {}", self.server.bind, e),
            })
    }

    pub fn registry(&self) -> Result<ConnectionRegistry, ConfigError> {
        Ok(ConnectionRegistry::new(self.connections.iter().cloned())?)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("BRONZELINE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
