//! Valuation Module.
//!
//! Converts book value, ROE, perpetual growth and required return into a
//! fair-value interval using the Gordon growth model:
//!
//! - `eps = bvps × roe`
//! - `retention = g / roe`, `dividend_ratio = 1 − retention`
//! - `dps = eps × dividend_ratio`
//! - `price = dps / (r − g)`, `pe = price / eps`
//!
//! The model runs three times (ROE lowered, nominal, raised by
//! [`DEFAULT_ROE_PERTURBATION`]) and the results are sorted into
//! lower/mid/upper.
//!
//! # Usage
//!
//! ```ignore
//! use stockval::valuation::{calculate, ValuationInputs};
//!
//! let result = calculate(&ValuationInputs::new(133.1, 0.25, 0.03, 0.10))?;
//! println!("Fair PE: {:.2} - {:.2}", result.pe_ratio_lower, result.pe_ratio_upper);
//! ```

pub mod engine;
pub mod types;

pub use engine::ValuationEngine;
pub use types::{
    SensitivityPolicy, ValuationError, ValuationInputs, ValuationResult, DEFAULT_ROE_FLOOR,
    DEFAULT_ROE_PERTURBATION,
};

/// Value inputs with the default sensitivity policy.
pub fn calculate(inputs: &ValuationInputs) -> Result<ValuationResult, ValuationError> {
    ValuationEngine::default().compute(inputs)
}
