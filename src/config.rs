//! Configuration file parser for ~/.config/frontpage/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged as warnings, since they are most
//! likely typos.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::enrich::EnrichSettings;
use crate::feed::FetchPolicy;
use crate::pipeline::{default_worker_count, PipelineSettings};
use crate::ranking::RankingWeights;
use crate::scheduler::Backoff;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Feed URLs to poll.
    pub subscriptions: Vec<String>,

    /// SQLite database file. Defaults to `frontpage.db` next to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Shortest polling interval for any source, in seconds.
    pub poll_floor_secs: u64,

    /// Longest polling interval for any source, in seconds.
    pub poll_ceiling_secs: u64,

    /// Feed fetch workers. 0 = one less than the number of cores.
    pub fetch_workers: usize,

    /// Enrichment workers. 0 = one less than the number of cores.
    pub enrich_workers: usize,

    pub fetch_timeout_secs: u64,
    pub image_timeout_secs: u64,
    pub max_redirects: usize,

    /// Accept self-signed TLS certificates. Off unless set explicitly.
    pub accept_invalid_certs: bool,

    pub fingerprint_attempts: u32,
    pub fingerprint_retry_delay_ms: u64,
    pub page_fetch_attempts: u32,
    pub page_retry_delay_ms: u64,
    pub max_image_candidates: usize,

    /// Progress log interval during a cycle. 0 disables progress output.
    pub progress_interval_ms: u64,

    pub ranking: RankingWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            database_path: None,
            poll_floor_secs: 16,
            poll_ceiling_secs: 86_400,
            fetch_workers: 0,
            enrich_workers: 0,
            fetch_timeout_secs: 10,
            image_timeout_secs: 3,
            max_redirects: 10,
            accept_invalid_certs: false,
            fingerprint_attempts: 4,
            fingerprint_retry_delay_ms: 250,
            page_fetch_attempts: 3,
            page_retry_delay_ms: 250,
            max_image_candidates: 8,
            progress_interval_ms: 1000,
            ranking: RankingWeights::default(),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "subscriptions",
    "database_path",
    "poll_floor_secs",
    "poll_ceiling_secs",
    "fetch_workers",
    "enrich_workers",
    "fetch_timeout_secs",
    "image_timeout_secs",
    "max_redirects",
    "accept_invalid_certs",
    "fingerprint_attempts",
    "fingerprint_retry_delay_ms",
    "page_fetch_attempts",
    "page_retry_delay_ms",
    "max_image_candidates",
    "progress_interval_ms",
    "ranking",
];

const KNOWN_RANKING_KEYS: &[&str] = &[
    "recency_scale",
    "read_penalty",
    "skip_penalty",
    "radius",
    "max_skips",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// `~/.config/frontpage/config.toml`, or a relative path if `HOME` is unset.
    pub fn default_path() -> PathBuf {
        let base = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config"))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("frontpage").join("config.toml")
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            subscriptions = config.subscriptions.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Write the configuration to `path`, replacing the file atomically.
    ///
    /// The subscription list is de-duplicated (first occurrence wins) before
    /// writing.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut config = self.clone();
        config.dedup_subscriptions();
        let content = toml::to_string_pretty(&config)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            std::fs::remove_file(&tmp).ok();
            return Err(ConfigError::Io(e));
        }
        tracing::info!(path = %path.display(), subscriptions = config.subscriptions.len(), "Saved configuration");
        Ok(())
    }

    pub fn dedup_subscriptions(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.subscriptions.retain(|s| seen.insert(s.trim().to_string()));
    }

    /// Database file, defaulting to `frontpage.db` beside `config_path`.
    pub fn database_path(&self, config_path: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("frontpage.db"),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.poll_floor_secs),
            Duration::from_secs(self.poll_ceiling_secs),
        )
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_redirects: self.max_redirects,
            accept_invalid_certs: self.accept_invalid_certs,
            ..FetchPolicy::default()
        }
    }

    pub fn enrich_settings(&self) -> EnrichSettings {
        EnrichSettings {
            page_timeout: Duration::from_secs(self.fetch_timeout_secs),
            page_attempts: self.page_fetch_attempts,
            retry_delay: Duration::from_millis(self.page_retry_delay_ms),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            max_image_candidates: self.max_image_candidates,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch_workers: workers_or_default(self.fetch_workers),
            enrich_workers: workers_or_default(self.enrich_workers),
            feed_timeout: Duration::from_secs(self.fetch_timeout_secs),
            fingerprint_attempts: self.fingerprint_attempts,
            fingerprint_retry_delay: Duration::from_millis(self.fingerprint_retry_delay_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            ..PipelineSettings::default()
        }
    }
}

fn workers_or_default(configured: usize) -> usize {
    if configured == 0 {
        default_worker_count()
    } else {
        configured
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(toml::Value::Table(ranking)) = raw.get("ranking") {
        for key in ranking.keys() {
            if !KNOWN_RANKING_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in [ranking], ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
