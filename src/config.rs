use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::fetch::{Backoff, RetryPolicy};
use crate::market::ResourceKind;

/// Overrides `api.base_url` when set.
pub const API_URL_ENV: &str = "MARKETDASH_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub fetch: FetchConfig,
  pub ttl: TtlConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
  /// `base * attempt`
  #[default]
  Linear,
  /// `base * 2^(attempt - 1)`, capped at 30s
  Exponential,
  /// `base` between every attempt
  Fixed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  /// Per-attempt bound on a single request
  pub timeout_ms: u64,
  pub max_retries: u32,
  pub backoff_base_ms: u64,
  pub backoff: BackoffKind,
  /// HTTP statuses retried like transport failures
  pub retry_statuses: Vec<u16>,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      timeout_ms: 30_000,
      max_retries: 3,
      backoff_base_ms: 1_000,
      backoff: BackoffKind::Linear,
      retry_statuses: vec![502, 503, 504],
    }
  }
}

impl FetchConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    let base = Duration::from_millis(self.backoff_base_ms);
    let backoff = match self.backoff {
      BackoffKind::Linear => Backoff::Linear { base },
      BackoffKind::Exponential => Backoff::Exponential {
        base,
        max: Duration::from_secs(30),
      },
      BackoffKind::Fixed => Backoff::Fixed(base),
    };
    RetryPolicy::default()
      .with_timeout(Duration::from_millis(self.timeout_ms))
      .with_max_retries(self.max_retries)
      .with_backoff(backoff)
      .with_retry_statuses(self.retry_statuses.clone())
  }
}

/// Freshness window per resource kind, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
  pub quote_secs: u64,
  pub chart_secs: u64,
  pub search_secs: u64,
  pub listing_secs: u64,
  pub profile_secs: u64,
  pub fundamentals_secs: u64,
}

impl Default for TtlConfig {
  fn default() -> Self {
    let secs = |kind: ResourceKind| kind.default_ttl().as_secs();
    Self {
      quote_secs: secs(ResourceKind::Quote),
      chart_secs: secs(ResourceKind::Chart),
      search_secs: secs(ResourceKind::Search),
      listing_secs: secs(ResourceKind::Listing),
      profile_secs: secs(ResourceKind::Profile),
      fundamentals_secs: secs(ResourceKind::Fundamentals),
    }
  }
}

impl TtlConfig {
  pub fn for_kind(&self, kind: ResourceKind) -> Duration {
    Duration::from_secs(match kind {
      ResourceKind::Quote => self.quote_secs,
      ResourceKind::Chart => self.chart_secs,
      ResourceKind::Search => self.search_secs,
      ResourceKind::Listing => self.listing_secs,
      ResourceKind::Profile => self.profile_secs,
      ResourceKind::Fundamentals => self.fundamentals_secs,
    })
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when `RUST_LOG` is unset
  pub level: String,
  /// Daily-rolling log file; stderr when unset
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./marketdash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/marketdash/config.yaml
  ///
  /// `MARKETDASH_API_URL` then overrides the API base URL.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("marketdash.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("marketdash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    // an empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn validate(&self) -> Result<()> {
    if self.fetch.timeout_ms == 0 {
      return Err(eyre!("fetch.timeout_ms must be greater than zero"));
    }
    self.base_url()?;
    Ok(())
  }

  /// The API base URL, parsed.
  pub fn base_url(&self) -> Result<Url> {
    let url = Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("api.base_url '{}' is not a valid URL: {}", self.api.base_url, e))?;
    if url.cannot_be_a_base() {
      return Err(eyre!("api.base_url '{}' cannot be used as a base URL", self.api.base_url));
    }
    Ok(url)
  }
}
