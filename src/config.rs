//! Service configuration, read from an optional TOML file and overridden by CLI flags

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::DEFAULT_DB_FILE;

/// Shape of the canonical serial-number pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: u32,
    #[serde(default = "default_serial_width")]
    pub width: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            width: default_serial_width(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            data_file: default_data_file(),
            pool: PoolConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
    }
}

// Default value functions for serde
fn default_pool_size() -> u32 {
    20000
}

fn default_serial_width() -> usize {
    5
}

fn default_listen_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verifier.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), Config::default());
    }

    #[test]
    fn partial_pool_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verifier.toml");
        std::fs::write(&path, "data_file = \"/var/lib/scans.json\"\n[pool]\nsize = 500\n").unwrap();
        let cfg = Config::load_from_file(&path).unwrap();
        assert_eq!(cfg.data_file, PathBuf::from("/var/lib/scans.json"));
        assert_eq!(cfg.pool, PoolConfig { size: 500, width: 5 });
        assert_eq!(cfg.listen_address, "0.0.0.0:5000");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Config::load_from_file(&dir.path().join("nope.toml")).is_err());
    }
}
