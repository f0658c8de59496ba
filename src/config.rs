use std::path::PathBuf;

use thiserror::Error;

use crate::model::ConflictMode;
use crate::tenant::DEFAULT_TENANT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONVENE_CONFLICT_MODE: {0}")]
    ConflictMode(String),
    #[error("both CONVENE_TLS_CERT and CONVENE_TLS_KEY must be set, or neither")]
    HalfTls,
}

/// Server settings, read once at startup from `CONVENE_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub conflict_mode: ConflictMode,
    pub default_database: String,
    pub tls: Option<TlsPaths>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            metrics_port: None,
            conflict_mode: ConflictMode::default(),
            default_database: DEFAULT_TENANT.into(),
            tls: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. Unparseable numbers keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let conflict_mode = match get("CONVENE_CONFLICT_MODE") {
            Some(s) => s.parse().map_err(ConfigError::ConflictMode)?,
            None => defaults.conflict_mode,
        };

        let tls = match (get("CONVENE_TLS_CERT"), get("CONVENE_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::HalfTls),
        };

        Ok(Self {
            bind: get("CONVENE_BIND").unwrap_or(defaults.bind),
            port: get("CONVENE_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: get("CONVENE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: get("CONVENE_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            metrics_port: get("CONVENE_METRICS_PORT").and_then(|s| s.parse().ok()),
            conflict_mode,
            default_database: get("CONVENE_DEFAULT_DATABASE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.default_database),
            tls,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
