//! Market data module.
//!
//! Defines the market segments, the quote shape returned by data sources and
//! the persisted stock record, together with the two collaborator seams used
//! by refresh jobs:
//!
//! - [`MarketDataSource`]: fetches a quote for one symbol (Xueqiu in production)
//! - [`StockRepository`]: stores and lists watched stock records (SQLite in production)

mod repository;
mod source;
pub mod sqlite;
pub mod xueqiu;

pub use repository::{
    InMemoryRepository, RepositoryError, StockFilter, StockPage, StockRepository,
};
pub use source::{FetchError, MarketDataSource};
pub use sqlite::SqliteRepository;
pub use xueqiu::XueqiuSource;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use stockval_common::validation::canonical_scope;
use thiserror::Error;

use crate::valuation::{ValuationInputs, ValuationResult};

/// Default perpetual growth assumption for new records.
pub const DEFAULT_PERPETUAL_GROWTH_RATE: f64 = 0.03;

/// Default required return assumption for new records.
pub const DEFAULT_REQUIRED_RETURN_RATE: f64 = 0.10;

// ============================================================================
// Segment
// ============================================================================

/// Market segment whose refreshes are tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Shanghai, Shenzhen and Beijing listed shares (A股)
    #[serde(alias = "A股")]
    AShare,
    /// Hong Kong listed shares (H股)
    #[serde(alias = "H股")]
    HShare,
    /// US listed shares (美股)
    #[serde(alias = "美股")]
    UsShare,
}

impl Segment {
    /// Every known segment, in display order.
    pub const ALL: [Segment; 3] = [Segment::AShare, Segment::HShare, Segment::UsShare];

    /// Stable key used in config, storage and status maps.
    pub const fn key(&self) -> &'static str {
        match self {
            Self::AShare => "a_share",
            Self::HShare => "h_share",
            Self::UsShare => "us_share",
        }
    }

    /// Human-readable label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AShare => "A股",
            Self::HShare => "H股",
            Self::UsShare => "美股",
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Error for an unrecognised segment name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown market segment: {0}")]
pub struct ParseSegmentError(pub String);

impl FromStr for Segment {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical_scope(s) {
            Some("a_share") => Ok(Self::AShare),
            Some("h_share") => Ok(Self::HShare),
            Some("us_share") => Ok(Self::UsShare),
            _ => Err(ParseSegmentError(s.to_string())),
        }
    }
}

// ============================================================================
// Quote
// ============================================================================

/// Quote and fundamentals returned by a market data source.
///
/// Missing fields stay `None`; they never overwrite stored values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    /// Float market capital, in units of 100 million
    pub market_cap: Option<f64>,
    /// Trailing PE, falling back to forecast PE
    pub pe: Option<f64>,
    pub eps: Option<f64>,
    pub book_value_per_share: Option<f64>,
    pub roe: Option<f64>,
}

// ============================================================================
// Stock Record
// ============================================================================

/// A watched stock: stored assumptions, latest quote and valuation bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub symbol: String,
    pub name: String,
    pub market: Segment,
    pub book_value_per_share: Option<f64>,
    pub roe: Option<f64>,
    #[serde(default = "default_growth")]
    pub perpetual_growth_rate: f64,
    #[serde(default = "default_required_return")]
    pub required_return_rate: f64,
    pub current_pe: Option<f64>,
    pub current_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub pe_ratio_lower: Option<f64>,
    pub pe_ratio_mid: Option<f64>,
    pub pe_ratio_upper: Option<f64>,
    pub theoretical_price_lower: Option<f64>,
    pub theoretical_price_mid: Option<f64>,
    pub theoretical_price_upper: Option<f64>,
    /// Included in scheduled and triggered refreshes
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    pub last_updated: DateTime<Utc>,
}

fn default_growth() -> f64 {
    DEFAULT_PERPETUAL_GROWTH_RATE
}

fn default_required_return() -> f64 {
    DEFAULT_REQUIRED_RETURN_RATE
}

fn default_auto_update() -> bool {
    true
}

impl StockRecord {
    /// A new watched record with default assumptions and no market data.
    pub fn new(symbol: impl Into<String>, market: Segment) -> Self {
        let symbol = symbol.into();
        Self {
            name: symbol.clone(),
            symbol,
            market,
            book_value_per_share: None,
            roe: None,
            perpetual_growth_rate: DEFAULT_PERPETUAL_GROWTH_RATE,
            required_return_rate: DEFAULT_REQUIRED_RETURN_RATE,
            current_pe: None,
            current_price: None,
            change_percent: None,
            volume: None,
            market_cap: None,
            pe_ratio_lower: None,
            pe_ratio_mid: None,
            pe_ratio_upper: None,
            theoretical_price_lower: None,
            theoretical_price_mid: None,
            theoretical_price_upper: None,
            auto_update: true,
            last_updated: Utc::now(),
        }
    }

    /// Merge a fetched quote. Fields absent from the quote keep their stored value.
    pub fn apply_quote(&mut self, quote: &Quote) {
        if let Some(name) = quote.name.as_ref().filter(|n| !n.is_empty()) {
            self.name = name.clone();
        }
        merge(&mut self.current_price, quote.price);
        merge(&mut self.change_percent, quote.change_percent);
        merge(&mut self.volume, quote.volume);
        merge(&mut self.market_cap, quote.market_cap);
        merge(&mut self.current_pe, quote.pe);
        merge(&mut self.book_value_per_share, quote.book_value_per_share);
        merge(&mut self.roe, quote.roe);
    }

    /// Valuation inputs, when both fundamentals are known.
    pub fn valuation_inputs(&self) -> Option<ValuationInputs> {
        Some(ValuationInputs::new(
            self.book_value_per_share?,
            self.roe?,
            self.perpetual_growth_rate,
            self.required_return_rate,
        ))
    }

    pub fn apply_valuation(&mut self, result: &ValuationResult) {
        self.pe_ratio_lower = Some(result.pe_ratio_lower);
        self.pe_ratio_mid = Some(result.pe_ratio_mid);
        self.pe_ratio_upper = Some(result.pe_ratio_upper);
        self.theoretical_price_lower = Some(result.theoretical_price_lower);
        self.theoretical_price_mid = Some(result.theoretical_price_mid);
        self.theoretical_price_upper = Some(result.theoretical_price_upper);
    }
}

fn merge(slot: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        *slot = Some(v);
    }
}
