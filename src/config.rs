//! Mergebot configuration.
//!
//! Loaded from `~/.mergebot/config.toml`. Every key is optional and a missing
//! file means defaults. Command line flags take precedence.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Mergebot configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Debbugs SOAP endpoint patches are fetched from.
    pub soap_url: Option<String>,

    /// Value for `gbp buildpackage --git-builder`,
    /// e.g. `sbuild -v -As --dist=unstable`.
    pub builder: Option<String>,

    /// Digits the invocation index is padded to in log file names
    /// (`000-git.invocation.log` at the default of 3).
    pub log_index_width: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load config from `~/.mergebot/config.toml`, or defaults if there is
    /// no such file (or no home directory).
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The config file path: `~/.mergebot/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".mergebot").join("config.toml"))
    }
}
