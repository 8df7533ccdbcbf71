use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SyncPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub site: SiteConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Base URL of the site, e.g. https://www.gracechapel.org
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
  /// Offline database location (defaults to the XDG data directory)
  pub path: Option<PathBuf>,
  /// Keep cache and queue in memory only
  #[serde(default = "default_true")]
  pub persist: bool,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      persist: true,
    }
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// Path polled to decide whether the site is reachable.
  /// Without it the client assumes it is always online.
  pub probe_path: Option<String>,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: None,
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

fn default_probe_interval_secs() -> u64 {
  15
}

impl ConnectivityConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SyncConfig {
  /// Dead-letter a queued write after this many failed replays
  pub max_attempts: Option<u32>,
  /// Dead-letter a queued write the server rejects with a client error
  #[serde(default)]
  pub dead_letter_rejected: bool,
}

impl SyncConfig {
  pub fn policy(&self) -> SyncPolicy {
    SyncPolicy {
      max_attempts: self.max_attempts,
      dead_letter_rejected: self.dead_letter_rejected,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CacheConfig {
  /// Upper bound on cached responses; unbounded when unset
  pub max_entries: Option<usize>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./chapel.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/chapel/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/chapel/config.yaml\n\
                 with at least:\n\n  site:\n    url: https://www.example.org"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("chapel.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("chapel").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub(crate) fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the site API token from the environment, if any.
  ///
  /// Checks CHAPEL_API_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("CHAPEL_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
