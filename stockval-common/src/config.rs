//! Configuration management for the stockval service.
//!
//! The service reads a single configuration file at `~/.stockval/config.json`
//! (or the path in `STOCKVAL_CONFIG`).
//!
//! # Configuration Priority
//!
//! 1. Environment variables (STOCKVAL_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `STOCKVAL_HOST` → server.host
//! - `STOCKVAL_PORT` → server.port
//! - `STOCKVAL_LOG_LEVEL` → observability.log_level
//! - `STOCKVAL_LOG_FORMAT` → observability.log_format
//! - `STOCKVAL_DB_PATH` → storage.db_path
//! - `STOCKVAL_XUEQIU_TOKEN` → market_data.token
//! - `STOCKVAL_WORKER_POOL_SIZE` → refresh.worker_pool_size

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "STOCKVAL_CONFIG";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".stockval"),
        |dirs| dirs.home_dir().join(".stockval"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server binding
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Stock record storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Valuation sensitivity policy
    #[serde(default)]
    pub valuation: ValuationConfig,

    /// Refresh job execution limits
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Quote provider settings
    #[serde(default)]
    pub market_data: MarketDataConfig,

    /// Background refresh schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("STOCKVAL_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("STOCKVAL_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(level) = std::env::var("STOCKVAL_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("STOCKVAL_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(path) = std::env::var("STOCKVAL_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Ok(token) = std::env::var("STOCKVAL_XUEQIU_TOKEN") {
            self.market_data.token = Some(token);
        }
        if let Ok(size) = std::env::var("STOCKVAL_WORKER_POOL_SIZE") {
            if let Ok(n) = size.parse() {
                self.refresh.worker_pool_size = n;
            }
        }
    }
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. "0.0.0.0" allows remote access.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// SQLite storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path. `~` is expanded to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl StorageConfig {
    /// Database path with `~` and environment variables expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        match shellexpand::full(&self.db_path) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(&self.db_path),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.stockval/stock_valuation.db".into()
}

// ============================================================================
// Valuation Configuration
// ============================================================================

/// Relative ROE perturbation used for the lower/upper sensitivity runs.
pub const DEFAULT_ROE_PERTURBATION: f64 = 0.10;

/// Smallest ROE a perturbed run may use.
pub const DEFAULT_ROE_FLOOR: f64 = 1e-6;

/// Sensitivity policy for the fair-value interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Relative perturbation applied to ROE (0.10 = ±10%)
    #[serde(default = "default_roe_perturbation")]
    pub roe_perturbation: f64,

    /// Floor for a perturbed ROE that would otherwise be <= 0
    #[serde(default = "default_roe_floor")]
    pub roe_floor: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            roe_perturbation: DEFAULT_ROE_PERTURBATION,
            roe_floor: DEFAULT_ROE_FLOOR,
        }
    }
}

fn default_roe_perturbation() -> f64 {
    DEFAULT_ROE_PERTURBATION
}

fn default_roe_floor() -> f64 {
    DEFAULT_ROE_FLOOR
}

// ============================================================================
// Refresh Configuration
// ============================================================================

/// Limits for refresh job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Maximum concurrent jobs per segment
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Fetch attempts before a transient failure becomes final
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts, doubled after each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Wall-clock limit for one symbol, retries included
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl RefreshConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_job_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Market Data Configuration
// ============================================================================

/// Quote provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Xueqiu API base URL
    #[serde(default = "default_market_data_url")]
    pub base_url: String,

    /// Xueqiu `xq_a_token` cookie value
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_data_url(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_market_data_url() -> String {
    "https://stock.xueqiu.com".into()
}

fn default_request_timeout_secs() -> u64 {
    15
}

// ============================================================================
// Schedule Configuration
// ============================================================================

/// Background refresh schedule.
///
/// ```json
/// {
///   "schedule": {
///     "enabled": true,
///     "entries": [
///       { "cron": "0 0 * * * *", "scope": "all" },
///       { "cron": "0 30 2 * * *", "scope": "all", "mode": "full" },
///       { "cron": "0 30 16 * * 1-5", "scope": "a_share" }
///     ]
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_schedule_entries")]
    pub entries: Vec<ScheduleEntry>,
}

/// One cron-driven refresh trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Cron expression with a leading seconds field
    pub cron: String,

    /// "all" or a segment key ("a_share", "h_share", "us_share")
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Which records the run covers
    #[serde(default)]
    pub mode: RefreshMode,
}

/// Record selection for a refresh run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Only records with `auto_update` set
    #[default]
    Watchlist,
    /// Every stored record, paused ones included
    Full,
}

impl std::fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Watchlist => write!(f, "watchlist"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entries: default_schedule_entries(),
        }
    }
}

fn default_schedule_entries() -> Vec<ScheduleEntry> {
    vec![
        // Hourly watchlist refresh
        ScheduleEntry {
            cron: "0 0 * * * *".into(),
            scope: default_scope(),
            mode: RefreshMode::Watchlist,
        },
        // Nightly full pass, off the hour so it never meets the hourly run
        ScheduleEntry {
            cron: "0 30 2 * * *".into(),
            scope: default_scope(),
            mode: RefreshMode::Full,
        },
    ]
}

fn default_scope() -> String {
    "all".into()
}

fn default_true() -> bool {
    true
}
