//! Configuration parsing and management.

use crate::abi::RuntimeLimits;
use crate::loader::LoaderSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding `build_version`
pub const BUILD_VERSION_ENV: &str = "RHYTHM_BUILD_VERSION";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Host configuration matching the rhythm.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Cache-busting token appended to asset URLs
    #[serde(default)]
    pub build_version: Option<String>,

    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub limits: RuntimeLimits,

    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_log_prefix() -> String {
    String::from("transpose-wasm")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_asset_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_wrapper")]
    pub wrapper: String,
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("build/web")
}

fn default_wrapper() -> String {
    String::from("transpose_wasm.loader.json")
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_asset_dir(),
            wrapper: default_wrapper(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Reject loop constructs by default
    #[serde(default)]
    pub no_loop: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            assets: AssetsConfig::default(),
            build_version: None,
            compiler: CompilerConfig::default(),
            limits: RuntimeLimits::default(),
            log_prefix: default_log_prefix(),
            config_path: None,
        }
    }
}

impl HostConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: HostConfig = serde_yaml::from_str(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults. The build
    /// version environment variable wins over either.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        if let Ok(version) = std::env::var(BUILD_VERSION_ENV) {
            config.build_version = Some(version);
        }
        Ok(config)
    }

    /// Get the asset directory, resolved relative to config file
    pub fn asset_dir(&self) -> PathBuf {
        self.resolve_path(&self.assets.dir)
    }

    /// Settings for a [`crate::ModuleLoader`]
    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            asset_dir: self.asset_dir(),
            wrapper: self.assets.wrapper.clone(),
            build_version: self.build_version.clone().filter(|v| !v.is_empty()),
            log_prefix: self.log_prefix.clone(),
            limits: self.limits.clone(),
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            if let Some(parent) = config_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }
}
