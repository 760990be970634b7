//! Valuation types.
//!
//! Inputs and outputs of the Gordon growth (dividend-discount) model, plus the
//! sensitivity policy that turns one nominal estimate into a fair-value
//! interval.

use serde::{Deserialize, Serialize};
use stockval_common::ValuationConfig;
use thiserror::Error;

pub use stockval_common::config::{DEFAULT_ROE_FLOOR, DEFAULT_ROE_PERTURBATION};

// ============================================================================
// Inputs
// ============================================================================

/// The four fundamentals a valuation is derived from.
///
/// All rates are fractions (0.25 means 25%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationInputs {
    /// Book value per share, in currency units
    pub book_value_per_share: f64,
    /// Return on equity
    pub roe: f64,
    /// Perpetual dividend growth rate (g)
    pub perpetual_growth_rate: f64,
    /// Required rate of return (r)
    pub required_return_rate: f64,
}

impl ValuationInputs {
    pub fn new(
        book_value_per_share: f64,
        roe: f64,
        perpetual_growth_rate: f64,
        required_return_rate: f64,
    ) -> Self {
        Self {
            book_value_per_share,
            roe,
            perpetual_growth_rate,
            required_return_rate,
        }
    }

    /// Reject inputs for which the model is undefined.
    pub fn validate(&self) -> Result<(), ValuationError> {
        let fields = [
            ("book_value_per_share", self.book_value_per_share),
            ("roe", self.roe),
            ("perpetual_growth_rate", self.perpetual_growth_rate),
            ("required_return_rate", self.required_return_rate),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ValuationError::invalid(field, "must be a finite number"));
            }
        }

        if self.book_value_per_share <= 0.0 {
            return Err(ValuationError::invalid(
                "book_value_per_share",
                "must be greater than 0",
            ));
        }
        if self.roe <= 0.0 {
            return Err(ValuationError::invalid("roe", "must be greater than 0"));
        }
        if self.required_return_rate <= self.perpetual_growth_rate {
            return Err(ValuationError::invalid(
                "required_return_rate",
                format!(
                    "must exceed perpetual_growth_rate ({} <= {})",
                    self.required_return_rate, self.perpetual_growth_rate
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Result
// ============================================================================

/// Output of one valuation.
///
/// The point estimates come from the nominal inputs. The `_lower/_mid/_upper`
/// fields are the sensitivity interval, each sorted independently so that
/// `lower <= mid <= upper` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub eps: f64,
    pub retention_ratio: f64,
    pub dividend_ratio: f64,
    pub dividend_per_share: f64,
    pub pe_ratio_lower: f64,
    pub pe_ratio_mid: f64,
    pub pe_ratio_upper: f64,
    pub theoretical_price_lower: f64,
    pub theoretical_price_mid: f64,
    pub theoretical_price_upper: f64,
}

// ============================================================================
// Sensitivity Policy
// ============================================================================

/// How the lowered and raised ROE runs are derived from the nominal ROE.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivityPolicy {
    /// Relative perturbation (0.10 means roe × 0.9 and roe × 1.1)
    pub roe_perturbation: f64,
    /// Perturbed ROE values below this are clamped up to it
    pub roe_floor: f64,
}

impl SensitivityPolicy {
    /// The lowered, nominal and raised ROE for a nominal value.
    pub fn roe_variants(&self, roe: f64) -> [f64; 3] {
        let delta = roe * self.roe_perturbation;
        [
            (roe - delta).max(self.roe_floor),
            roe,
            (roe + delta).max(self.roe_floor),
        ]
    }
}

impl Default for SensitivityPolicy {
    fn default() -> Self {
        Self {
            roe_perturbation: DEFAULT_ROE_PERTURBATION,
            roe_floor: DEFAULT_ROE_FLOOR,
        }
    }
}

impl From<&ValuationConfig> for SensitivityPolicy {
    fn from(config: &ValuationConfig) -> Self {
        Self {
            roe_perturbation: config.roe_perturbation,
            roe_floor: config.roe_floor,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Valuation failures. Always surfaced to the caller, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValuationError {
    #[error("invalid valuation input `{field}`: {reason}")]
    InvalidInput { field: &'static str, reason: String },
}

impl ValuationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

impl From<ValuationError> for stockval_common::Error {
    fn from(err: ValuationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
