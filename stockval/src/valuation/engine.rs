//! Gordon growth valuation engine.

use super::types::{SensitivityPolicy, ValuationError, ValuationInputs, ValuationResult};

/// One evaluation of the model at a single ROE.
#[derive(Debug, Clone, Copy)]
struct PointEstimate {
    eps: f64,
    retention_ratio: f64,
    dividend_ratio: f64,
    dividend_per_share: f64,
    theoretical_price: f64,
    pe_ratio: f64,
}

fn point_estimate(bvps: f64, roe: f64, g: f64, r: f64) -> PointEstimate {
    let eps = bvps * roe;
    let retention_ratio = g / roe;
    let dividend_ratio = 1.0 - retention_ratio;
    let dividend_per_share = eps * dividend_ratio;
    let theoretical_price = dividend_per_share / (r - g);
    PointEstimate {
        eps,
        retention_ratio,
        dividend_ratio,
        dividend_per_share,
        theoretical_price,
        pe_ratio: theoretical_price / eps,
    }
}

fn sorted(mut values: [f64; 3]) -> [f64; 3] {
    values.sort_by(f64::total_cmp);
    values
}

/// Stateless valuation engine parameterised by a sensitivity policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuationEngine {
    policy: SensitivityPolicy,
}

impl ValuationEngine {
    pub fn new(policy: SensitivityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SensitivityPolicy {
        self.policy
    }

    /// Compute point estimates and the sorted sensitivity interval.
    pub fn compute(&self, inputs: &ValuationInputs) -> Result<ValuationResult, ValuationError> {
        inputs.validate()?;

        let ValuationInputs {
            book_value_per_share: bvps,
            roe,
            perpetual_growth_rate: g,
            required_return_rate: r,
        } = *inputs;

        let nominal = point_estimate(bvps, roe, g, r);
        let runs = self
            .policy
            .roe_variants(roe)
            .map(|roe| point_estimate(bvps, roe, g, r));

        let [price_lower, price_mid, price_upper] = sorted(runs.map(|p| p.theoretical_price));
        let [pe_lower, pe_mid, pe_upper] = sorted(runs.map(|p| p.pe_ratio));

        Ok(ValuationResult {
            eps: nominal.eps,
            retention_ratio: nominal.retention_ratio,
            dividend_ratio: nominal.dividend_ratio,
            dividend_per_share: nominal.dividend_per_share,
            pe_ratio_lower: pe_lower,
            pe_ratio_mid: pe_mid,
            pe_ratio_upper: pe_upper,
            theoretical_price_lower: price_lower,
            theoretical_price_mid: price_mid,
            theoretical_price_upper: price_upper,
        })
    }
}
