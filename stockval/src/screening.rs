//! Valuation screening.
//!
//! Classifies each stored record by where its current PE sits relative to
//! the computed fair PE band.

use serde::Serialize;

use crate::data::{Segment, StockRecord};

/// Position of the current PE against the fair band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// current PE below the lower bound (低估)
    Undervalued,
    /// current PE within [lower, upper] (合理)
    Reasonable,
    /// current PE above the upper bound (高估)
    Overvalued,
    /// missing current PE or band (未知)
    Unknown,
}

impl Verdict {
    pub fn classify(record: &StockRecord) -> Self {
        match (record.current_pe, record.pe_ratio_lower, record.pe_ratio_upper) {
            (Some(pe), Some(lower), Some(upper)) => {
                if pe < lower {
                    Self::Undervalued
                } else if pe > upper {
                    Self::Overvalued
                } else {
                    Self::Reasonable
                }
            }
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undervalued => write!(f, "低估"),
            Self::Reasonable => write!(f, "合理"),
            Self::Overvalued => write!(f, "高估"),
            Self::Unknown => write!(f, "未知"),
        }
    }
}

/// Unrecognised verdict filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown valuation status: {0}")]
pub struct ParseVerdictError(pub String);

impl std::str::FromStr for Verdict {
    type Err = ParseVerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "低估" => return Ok(Self::Undervalued),
            "合理" => return Ok(Self::Reasonable),
            "高估" => return Ok(Self::Overvalued),
            "数据缺失" | "未知" => return Ok(Self::Unknown),
            _ => {}
        }
        match s.trim().to_lowercase().as_str() {
            "undervalued" => Ok(Self::Undervalued),
            "reasonable" => Ok(Self::Reasonable),
            "overvalued" => Ok(Self::Overvalued),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseVerdictError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreeningItem {
    pub symbol: String,
    pub name: String,
    pub market: Segment,
    pub verdict: Verdict,
    pub current_pe: Option<f64>,
    pub pe_ratio_lower: Option<f64>,
    pub pe_ratio_mid: Option<f64>,
    pub pe_ratio_upper: Option<f64>,
    pub current_price: Option<f64>,
    pub theoretical_price_lower: Option<f64>,
    pub theoretical_price_mid: Option<f64>,
    pub theoretical_price_upper: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScreeningReport {
    pub total: usize,
    pub undervalued: usize,
    pub reasonable: usize,
    pub overvalued: usize,
    pub unknown: usize,
    pub items: Vec<ScreeningItem>,
}

pub fn screen(records: &[StockRecord]) -> ScreeningReport {
    let mut report = ScreeningReport {
        total: records.len(),
        ..Default::default()
    };

    for record in records {
        let verdict = Verdict::classify(record);
        match verdict {
            Verdict::Undervalued => report.undervalued += 1,
            Verdict::Reasonable => report.reasonable += 1,
            Verdict::Overvalued => report.overvalued += 1,
            Verdict::Unknown => report.unknown += 1,
        }
        report.items.push(ScreeningItem {
            symbol: record.symbol.clone(),
            name: record.name.clone(),
            market: record.market,
            verdict,
            current_pe: record.current_pe,
            pe_ratio_lower: record.pe_ratio_lower,
            pe_ratio_mid: record.pe_ratio_mid,
            pe_ratio_upper: record.pe_ratio_upper,
            current_price: record.current_price,
            theoretical_price_lower: record.theoretical_price_lower,
            theoretical_price_mid: record.theoretical_price_mid,
            theoretical_price_upper: record.theoretical_price_upper,
        });
    }

    report
}
