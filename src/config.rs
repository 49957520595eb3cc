use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Per-namespace cache freshness windows
  #[serde(default)]
  pub cache: CacheConfig,
  /// Polling cadence for snoozed/pending threads
  #[serde(default)]
  pub poll: PollConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the mail backend API (e.g. "https://mail.example.com/api")
  pub url: String,
  /// Account the client syncs (shown in the diagnostic CLI header)
  pub account: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// TTL for single thread records, in seconds
  #[serde(default = "default_detail_ttl")]
  pub detail_ttl_secs: u64,
  /// TTL for paginated list pages, in seconds
  #[serde(default = "default_list_ttl")]
  pub list_ttl_secs: u64,
  /// TTL for per-scope aggregate summaries, in seconds
  #[serde(default = "default_summary_ttl")]
  pub summary_ttl_secs: u64,
  /// Override for the cache database location
  pub path: Option<PathBuf>,
}

fn default_detail_ttl() -> u64 {
  300
}

fn default_list_ttl() -> u64 {
  60
}

fn default_summary_ttl() -> u64 {
  60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      detail_ttl_secs: default_detail_ttl(),
      list_ttl_secs: default_list_ttl(),
      summary_ttl_secs: default_summary_ttl(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
  /// Seconds between refreshes while snoozed/pending threads exist
  #[serde(default = "default_poll_interval")]
  pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
  30
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_poll_interval(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mailboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mailboard/config.yaml
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
        "No configuration file found. Create one at ~/.config/mailboard/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mailboard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mailboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the backend access token from environment variables.
  ///
  /// Checks MAILBOARD_TOKEN first, then GMAIL_API_TOKEN as fallback.
  /// Token refresh happens outside this crate; an expired token surfaces
  /// as an ordinary failed request.
  pub fn get_api_token() -> Result<String> {
    std::env::var("MAILBOARD_TOKEN")
      .or_else(|_| std::env::var("GMAIL_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Backend token not found. Set MAILBOARD_TOKEN or GMAIL_API_TOKEN environment variable."
        )
      })
  }
}
