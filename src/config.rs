//! Configuration file for `imagectl`.
//!
//! # Overview
//!
//! The first file found is used:
//! - the path given with `--config`
//! - `$XDG_CONFIG_HOME/imagestore/imagestore.toml`, falling back to
//!   `$HOME/.config/imagestore/imagestore.toml`
//! - `/etc/imagestore/imagestore.toml`
//!
//! Command line options override anything set here.
//!
//! # Configuration Structure
//!
//! ```toml
//! root = "/var/lib/imagestore"
//! platform = "linux/arm64"
//! default_tag = "latest"
//! ```

use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    platform::Platform,
};

const SYSTEM_CONFIG: &str = "/etc/imagestore/imagestore.toml";

/// Settings read from `imagestore.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Repository directory.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Platform (`os/arch[/variant]`) used instead of the host's.
    #[serde(default)]
    pub platform: Option<String>,

    /// Tag given to names that have neither tag nor digest.
    #[serde(default)]
    pub default_tag: Option<String>,
}

impl StoreConfig {
    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The configured platform, validated.
    pub fn platform(&self) -> Result<Option<Platform>> {
        self.platform.as_deref().map(Platform::parse).transpose()
    }

    /// Read the configuration from `explicit`, or from the first file that
    /// exists in the search path. No file at all gives the defaults; an
    /// explicit path that does not exist is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }
        for path in search_path() {
            if path.is_file() {
                return Self::read(&path);
            }
        }
        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::InvalidParameter(format!("{}: {e}", path.display())))?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Candidate configuration files, most specific first.
pub fn search_path() -> Vec<PathBuf> {
    let mut paths = vec![];
    let user_dir = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")));
    if let Some(dir) = user_dir {
        paths.push(dir.join("imagestore/imagestore.toml"));
    }
    paths.push(PathBuf::from(SYSTEM_CONFIG));
    paths
}
