//! Host configuration: where the store lives and where seed documents
//! come from. Owned by the embedding application; the core only consumes
//! the resulting paths through the context.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{PrefsContext, ScopeMap};

/// Environment override for the store base path.
pub const STORE_PATH_ENV: &str = "PREFSTORE_STORE_PATH";
/// Environment override for the seed-document directory.
pub const SEED_PATH_ENV: &str = "PREFSTORE_SEED_PATH";

const CONFIG_DIR_ENV: &str = "PREFSTORE_CONFIG_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory the `prefs-store/` documents live under. Absent
    /// means the process temp directory.
    pub store_path: Option<PathBuf>,
    /// Directory holding initial-state documents for first-time
    /// population of a tree. Absent means no seeding.
    pub seed_path: Option<PathBuf>,
}

impl Config {
    /// Read the configuration from environment variables only.
    pub fn from_env() -> Self {
        Config {
            store_path: env_path(STORE_PATH_ENV),
            seed_path: env_path(SEED_PATH_ENV),
        }
    }

    /// Build a context over the given scope caches, carrying this
    /// configuration's paths.
    pub fn context(&self, scope_app: ScopeMap, scope_user: ScopeMap) -> PrefsContext {
        let mut ctx = PrefsContext::new(scope_app, scope_user);
        if let Some(path) = &self.store_path {
            ctx = ctx.with_store_path(path);
        }
        if let Some(path) = &self.seed_path {
            ctx = ctx.with_seed_path(path);
        }
        ctx
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {source}")]
    Render {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Configuration directory.
///
/// Uses `PREFSTORE_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/prefstore`
/// or `~/.config/prefstore`.
fn config_dir() -> PathBuf {
    if let Some(dir) = env_path(CONFIG_DIR_ENV) {
        return dir;
    }
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".config")
        })
        .join("prefstore")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load() -> Result<Config, ConfigError> {
    load_from(&config_path())
}

fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the configuration, falling back to (and writing) defaults when
/// the file is absent or unreadable.
pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load_from(&path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                tracing::warn!("config load failed, using defaults: {err}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(err) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {err}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let contents = toml::to_string_pretty(cfg).map_err(|source| ConfigError::Render { source })?;
    atomic_write(path, contents.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "config path has no parent"))?;
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    fs::write(temp.path(), data)?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            store_path: Some(PathBuf::from("/data/prefs")),
            seed_path: Some(PathBuf::from("/data/seeds")),
        };
        write_config(&path, &cfg).expect("write config");
        let loaded = load_from(&path).expect("load config");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn absent_fields_default_to_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "").expect("write empty config");
        let loaded = load_from(&path).expect("load config");
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            load_from(&path),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn context_carries_configured_paths() {
        let cfg = Config {
            store_path: Some(PathBuf::from("/data/prefs")),
            seed_path: None,
        };
        let ctx = cfg.context(ScopeMap::new(), ScopeMap::new());
        assert_eq!(ctx.store_path(), Some(Path::new("/data/prefs")));
        assert_eq!(ctx.seed_path(), None);
    }
}
