//! Configuration validation.
//!
//! Catches values that would make the service misbehave at runtime
//! (zero workers, inverted sensitivity, unparseable cron) before startup.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    Config, MarketDataConfig, ObservabilityConfig, RefreshConfig, ScheduleConfig, ServerConfig,
    ValuationConfig,
};

/// Canonical scope keys.
pub const VALID_SCOPES: &[&str] = &["all", "a_share", "h_share", "us_share"];

/// Resolve a scope name or alias (`A股`, `hk`, `US`, ...) to its canonical key.
///
/// This is the single table of accepted names; segment parsing in the
/// service crate goes through it too.
pub fn canonical_scope(name: &str) -> Option<&'static str> {
    let name = name.trim();
    match name {
        "A股" => return Some("a_share"),
        "H股" => return Some("h_share"),
        "美股" => return Some("us_share"),
        "全部" => return Some("all"),
        _ => {}
    }
    match name.to_lowercase().as_str() {
        "all" => Some("all"),
        "a_share" | "ashare" | "a" | "cn" => Some("a_share"),
        "h_share" | "hshare" | "h" | "hk" => Some("h_share"),
        "us_share" | "usshare" | "us" => Some("us_share"),
        _ => None,
    }
}

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.server,
            &self.observability,
            &self.valuation,
            &self.refresh,
            &self.market_data,
            &self.schedule,
        ];

        let mut errors: Vec<ValidationError> =
            sections.iter().filter_map(|s| s.validate().err()).collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load configuration (with env overrides) and validate it.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "server.host".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for ValuationConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.roe_perturbation.is_finite()
            || self.roe_perturbation <= 0.0
            || self.roe_perturbation >= 1.0
        {
            return Err(ValidationError::InvalidValue {
                field: "valuation.roe_perturbation".into(),
                reason: "must be in (0, 1)".into(),
            });
        }
        if !self.roe_floor.is_finite() || self.roe_floor <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "valuation.roe_floor".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for RefreshConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.worker_pool_size == 0 {
            return Err(ValidationError::InvalidValue {
                field: "refresh.worker_pool_size".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidValue {
                field: "refresh.max_attempts".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.job_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "refresh.job_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for MarketDataConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ValidationError::InvalidValue {
                field: "market_data.base_url".into(),
                reason: format!("not an http(s) URL: {}", self.base_url),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "market_data.request_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ScheduleConfig {
    fn validate(&self) -> ValidationResult<()> {
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.cron.is_empty() {
                return Err(ValidationError::MissingField {
                    field: format!("schedule.entries[{}].cron", i),
                });
            }
            if cron::Schedule::from_str(&entry.cron).is_err() {
                return Err(ValidationError::InvalidValue {
                    field: format!("schedule.entries[{}].cron", i),
                    reason: format!("invalid cron expression: {}", entry.cron),
                });
            }
            if canonical_scope(&entry.scope).is_none() {
                return Err(ValidationError::InvalidValue {
                    field: format!("schedule.entries[{}].scope", i),
                    reason: format!("must be one of: {}", VALID_SCOPES.join(", ")),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "invalid".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "observability.log_level"
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.refresh.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_perturbation_out_of_range() {
        let mut config = Config::default();
        config.valuation.roe_perturbation = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_cron_expression() {
        let mut config = Config::default();
        config.schedule.entries.push(ScheduleEntry {
            cron: "every hour please".into(),
            scope: "all".into(),
            mode: RefreshMode::Watchlist,
        });
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "schedule.entries[2].cron"
        ));
    }

    #[test]
    fn test_unknown_schedule_scope() {
        let mut config = Config::default();
        config.schedule.entries[0].scope = "crypto".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scope_aliases_accepted() {
        let mut config = Config::default();
        for alias in ["A股", "hk", "US", " all "] {
            config.schedule.entries[0].scope = alias.into();
            assert!(config.validate().is_ok(), "alias {} rejected", alias);
        }
    }

    #[test]
    fn test_canonical_scope() {
        assert_eq!(canonical_scope("H股"), Some("h_share"));
        assert_eq!(canonical_scope("CN"), Some("a_share"));
        assert_eq!(canonical_scope("ALL"), Some("all"));
        assert_eq!(canonical_scope("crypto"), None);
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.server.port = 0;
        config.refresh.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ValidationError::Multiple(ref v)) if v.len() == 2));
    }
}
