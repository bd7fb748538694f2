//! CLI configuration
//!
//! Settings come from an optional TOML file, overridden by command-line
//! flags (which themselves fall back to `CARDSTACK_*` environment
//! variables through clap).

use std::path::{Path, PathBuf};

use cardstack::{GetResponseLayer, LayerHandle, ShareMode, TraceLayer};
use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use crate::formatters::FormatMode;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "cardstack.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Bundled layers that can be mounted by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    /// Log every command and response
    Trace,
    /// Complete 61XX / 6CXX exchanges
    GetResponse,
}

impl LayerKind {
    pub fn build(&self) -> LayerHandle {
        match self {
            LayerKind::Trace => LayerHandle::new(TraceLayer::default()),
            LayerKind::GetResponse => LayerHandle::new(GetResponseLayer::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShareArg {
    Shared,
    Exclusive,
    Direct,
}

impl From<ShareArg> for ShareMode {
    fn from(share: ShareArg) -> Self {
        match share {
            ShareArg::Shared => ShareMode::Shared,
            ShareArg::Exclusive => ShareMode::Exclusive,
            ShareArg::Direct => ShareMode::Direct,
        }
    }
}

/// Contents of a `cardstack.toml` file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub reader: Option<String>,
    pub share: Option<ShareArg>,
    /// Mounted in order, so the last entry ends up on top
    #[serde(default)]
    pub layers: Vec<LayerKind>,
    pub log_level: Option<String>,
    pub format: Option<FormatMode>,
}

impl FileConfig {
    /// Load `path`, or the default file if it exists.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::read(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values taken from the command line, before merging
#[derive(Debug, Default)]
pub struct Overrides {
    pub reader: Option<String>,
    pub share: Option<ShareArg>,
    pub layers: Vec<LayerKind>,
    pub log_level: Option<String>,
    pub format: Option<FormatMode>,
    pub simulate: bool,
}

/// Effective settings for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub reader: Option<String>,
    pub share_mode: ShareMode,
    pub layers: Vec<LayerKind>,
    pub log_level: String,
    pub format: FormatMode,
    pub simulate: bool,
}

impl Settings {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        let layers = if overrides.layers.is_empty() {
            file.layers
        } else {
            overrides.layers
        };

        Self {
            reader: overrides.reader.or(file.reader),
            share_mode: overrides.share.or(file.share).map(ShareMode::from).unwrap_or_default(),
            layers,
            log_level: overrides
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            format: overrides.format.or(file.format).unwrap_or(FormatMode::Human),
            simulate: overrides.simulate,
        }
    }
}
