//! Grammar configuration for marklex.
//!
//! Rules in a grammar can be gated on the boolean options of [`Config`]
//! through a [`Flag`], and token producers read the string options directly.
//! A config file is plain TOML; every key is optional, and a missing file
//! means the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to expand config path {path}: {source}")]
    PathExpandError {
        path: String,
        source: shellexpand::LookupError<std::env::VarError>,
    },
}

/// A named boolean option of [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// `# Title #` renders a centered heading.
    HeaderAlign,
    /// Section syntax (`#> Title`) is recognized.
    AllowSection,
    /// Table syntax is recognized.
    AllowTable,
    /// Sections without an explicit `+`/`-` marker start open.
    SectionOpen,
    /// Structured tokens carry absolute `start`/`end` offsets.
    RequireBound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub header_align: bool,
    pub allow_section: bool,
    /// Language tag used for code blocks that don't name one.
    pub default_lang: String,
    pub allow_table: bool,
    pub section_open: bool,
    pub require_bound: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            header_align: false,
            allow_section: true,
            default_lang: "plaintext".to_string(),
            allow_table: true,
            section_open: true,
            require_bound: false,
        }
    }
}

impl Config {
    pub fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::HeaderAlign => self.header_align,
            Flag::AllowSection => self.allow_section,
            Flag::AllowTable => self.allow_table,
            Flag::SectionOpen => self.section_open,
            Flag::RequireBound => self.require_bound,
        }
    }

    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        Ok(Some(config))
    }

    /// Loads the config at `path`, which may start with `~` or name
    /// environment variables. A missing file gives the defaults.
    pub fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        let config_path = expand_path(path)?;
        Ok(Self::load_from_path(config_path)?.unwrap_or_default())
    }

    /// Default location of the user's config file.
    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/marklex");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }
}

/// Expands `~` and `$VAR` in `path`.
pub fn expand_path(path: &str) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(path).map_err(|source| ConfigError::PathExpandError {
        path: path.to_string(),
        source,
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}
