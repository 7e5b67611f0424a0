use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub assets: AssetsConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Where the local store, asset cache and logs live
  /// (defaults to $XDG_DATA_HOME/storysync)
  pub data_dir: Option<PathBuf>,
  /// Name shown on stories written offline until the server copy arrives
  pub author: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://story-api.dicoding.dev/v1".to_string(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

/// The application shell served to clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub origin: String,
  /// Requests whose URL contains this are API traffic and never cached
  pub api_path_prefix: String,
  /// Document served when a request fails with no response at all
  pub fallback_document: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      api_path_prefix: "/v1/".to_string(),
      fallback_document: "/offline.html".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
  /// Cache name; bumping it replaces the whole asset cache on activate
  pub version: String,
  /// Shell assets fetched at install time
  pub shell: Vec<String>,
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      version: "story-map-v1".to_string(),
      shell: [
        "/",
        "/index.html",
        "/app.bundle.js",
        "/app.css",
        "/images/logo.png",
        "/favicon.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Backoff after the first failed replay; doubles per further failure
  pub base_delay_secs: u64,
  pub max_delay_secs: u64,
  /// Replay attempts allowed in flight at once
  pub max_in_flight: usize,
  /// How often `watch` probes the API host
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      base_delay_secs: 2,
      max_delay_secs: 300,
      max_in_flight: 4,
      probe_interval_secs: 15,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storysync/config.yaml
  ///
  /// Without any file the defaults apply.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storysync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storysync").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Directory holding the databases and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storysync"))
  }

  pub fn author(&self) -> &str {
    self.author.as_deref().unwrap_or("me")
  }

  /// Get the bearer token from the environment.
  ///
  /// Checks STORYSYNC_TOKEN.
  pub fn get_token() -> Result<String> {
    std::env::var("STORYSYNC_TOKEN").map_err(|_| {
      eyre!("No token found. Run `storysync login` and export STORYSYNC_TOKEN.")
    })
  }
}
