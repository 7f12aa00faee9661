use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "PASTEKEEP_CONFIG";
pub const STORE_ENV: &str = "PASTEKEEP_STORE";
pub const SQLITE_PATH_ENV: &str = "PASTEKEEP_SQLITE_PATH";
pub const LOG_ENV: &str = "PASTEKEEP_LOG";

const DEFAULT_SQLITE_PATH: &str = "data/pastekeep.db";
const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_PAGE_SIZE: usize = 15;
pub const MAX_PAGE_SIZE: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub log_filter: String,
    pub page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown store backend `{0}` (expected memory or sqlite)")]
    UnknownBackend(String),
    #[error("page_size must be between 1 and {MAX_PAGE_SIZE}, got {0}")]
    PageSize(usize),
}

impl AppConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(input)?;
        config.validate()
    }

    /// Reads the optional TOML file named by `PASTEKEEP_CONFIG`, then applies env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                let path = PathBuf::from(path);
                let raw = fs::read_to_string(&path).map_err(|e| ConfigError::Read(path, e))?;
                Self::from_toml_str(&raw)?
            }
            _ => Self::default(),
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sqlite_path = lookup(SQLITE_PATH_ENV).filter(|p| !p.trim().is_empty());

        match lookup(STORE_ENV) {
            Some(value) if value.eq_ignore_ascii_case("memory") => {
                self.store = StoreBackend::Memory;
            }
            Some(value) if value.eq_ignore_ascii_case("sqlite") => {
                let path = sqlite_path
                    .clone()
                    .map(PathBuf::from)
                    .or_else(|| match &self.store {
                        StoreBackend::Sqlite { path } => Some(path.clone()),
                        StoreBackend::Memory => None,
                    })
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH));
                self.store = StoreBackend::Sqlite { path };
            }
            Some(value) if value.trim().is_empty() => {}
            Some(value) => return Err(ConfigError::UnknownBackend(value)),
            None => {}
        }

        if let (Some(path), StoreBackend::Sqlite { .. }) = (sqlite_path, &self.store) {
            self.store = StoreBackend::Sqlite {
                path: PathBuf::from(path),
            };
        }

        if let Some(filter) = lookup(LOG_ENV).filter(|f| !f.trim().is_empty()) {
            self.log_filter = filter;
        }

        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageSize(self.page_size));
        }
        Ok(self)
    }
}
