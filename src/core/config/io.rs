use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::core::config::data::Config;

/// Errors raised while reading or writing the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "failed to parse config at {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Write { path, source } => {
                write!(
                    f,
                    "failed to write config at {}: {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } | ConfigError::Write { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl Config {
    /// Load the config file, creating it from defaults when absent.
    ///
    /// Missing fields on an existing file are backfilled from the
    /// compiled-in defaults and the healed file is written back, so the
    /// on-disk schema self-migrates across versions.
    pub fn load_or_init(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            let config = Config::default();
            config.save_to_path(config_path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source,
            })?;

        let healed = config.heal();
        let rewritten = toml::to_string_pretty(&config).unwrap_or_default();
        if healed || rewritten != contents {
            config.save_to_path(config_path)?;
        }

        Ok(config)
    }

    /// Whole-file atomic replacement via a sibling temp file.
    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: config_path.to_path_buf(),
            source,
        };

        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|source| ConfigError::Write {
            path: config_path.to_path_buf(),
            source: std::io::Error::other(source),
        })?;

        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir).map_err(write_err)?,
            None => NamedTempFile::new().map_err(write_err)?,
        };
        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(config_path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    /// Platform config file location (`<config dir>/clipgen/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "permacommons", "clipgen")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Platform data directory holding per-conversation history files.
    pub fn default_conversation_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "permacommons", "clipgen")
            .map(|dirs| dirs.data_dir().join("conversations"))
    }
}
