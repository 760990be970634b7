//! Xueqiu (雪球) quote source.
//!
//! Uses the public quote endpoint with the detail extension, which returns the
//! real-time quote together with per-share fundamentals:
//!
//! `GET {base_url}/v5/stock/quote.json?symbol=SH600519&extend=detail`
//!
//! The endpoint requires an `xq_a_token` cookie for most symbols.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use stockval_common::MarketDataConfig;
use tracing::{debug, warn};

use super::source::{FetchError, MarketDataSource};
use super::{Quote, Segment};

const QUOTE_PATH: &str = "/v5/stock/quote.json";

// ============================================================================
// Symbol Mapping
// ============================================================================

/// Convert a stored symbol to the code Xueqiu expects.
///
/// - A-shares: exchange prefix from the leading digit (6/9 → SH, 4/8 → BJ,
///   otherwise SZ); `600519.SH` and `SH600519` pass through as `SH600519`
/// - H-shares: zero-padded five digit code (`700` → `00700`)
/// - US shares: upper-cased ticker
pub fn to_xueqiu_symbol(symbol: &str, market: Segment) -> String {
    let symbol = symbol.trim().to_uppercase();
    match market {
        Segment::AShare => {
            if let Some((code, exchange)) = symbol.split_once('.') {
                return format!("{}{}", exchange, code);
            }
            if ["SH", "SZ", "BJ"].iter().any(|p| symbol.starts_with(p)) {
                return symbol;
            }
            let exchange = match symbol.chars().next() {
                Some('6') | Some('9') => "SH",
                Some('4') | Some('8') => "BJ",
                _ => "SZ",
            };
            format!("{}{}", exchange, symbol)
        }
        Segment::HShare => {
            let code = symbol.strip_prefix("HK").unwrap_or(&symbol);
            let code = code.strip_suffix(".HK").unwrap_or(code);
            if code.chars().all(|c| c.is_ascii_digit()) {
                format!("{:0>5}", code)
            } else {
                code.to_string()
            }
        }
        Segment::UsShare => symbol,
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    data: Option<QuoteData>,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    quote: Option<XueqiuQuote>,
}

#[derive(Debug, Deserialize)]
struct XueqiuQuote {
    symbol: Option<String>,
    name: Option<String>,
    current: Option<f64>,
    percent: Option<f64>,
    volume: Option<f64>,
    float_market_capital: Option<f64>,
    pe_ttm: Option<f64>,
    pe_forecast: Option<f64>,
    eps: Option<f64>,
    navps: Option<f64>,
}

impl XueqiuQuote {
    fn into_quote(self, requested: &str) -> Quote {
        let roe = match (self.eps, self.navps) {
            (Some(eps), Some(navps)) if navps != 0.0 => Some(eps / navps),
            _ => None,
        };
        Quote {
            symbol: self.symbol.unwrap_or_else(|| requested.to_string()),
            name: self.name,
            price: self.current,
            change_percent: self.percent,
            volume: self.volume,
            market_cap: self.float_market_capital.map(|v| v / 1e8),
            pe: self.pe_ttm.or(self.pe_forecast),
            eps: self.eps,
            book_value_per_share: self.navps,
            roe,
        }
    }
}

// ============================================================================
// Xueqiu Source
// ============================================================================

/// Quote source backed by the Xueqiu HTTP API.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)";

/// Client with the request timeout applied. A builder failure falls back to
/// reqwest defaults, which have no timeout, and is logged.
fn http_client(timeout: Duration, user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|e| {
            warn!(
                error = %e,
                timeout_secs = timeout.as_secs(),
                "Failed to build HTTP client, falling back to defaults without request timeout"
            );
            reqwest::Client::new()
        })
}

pub struct XueqiuSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl XueqiuSource {
    pub fn new(config: &MarketDataConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Self {
            client: http_client(timeout, USER_AGENT),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl MarketDataSource for XueqiuSource {
    fn name(&self) -> &'static str {
        "xueqiu"
    }

    async fn fetch(&self, symbol: &str, market: Segment) -> Result<Quote, FetchError> {
        let code = to_xueqiu_symbol(symbol, market);
        let url = format!("{}{}", self.base_url, QUOTE_PATH);

        debug!(symbol = %code, segment = %market, "Fetching quote from xueqiu");

        let mut request = self
            .client
            .get(&url)
            .query(&[("symbol", code.as_str()), ("extend", "detail")]);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::COOKIE, format!("xq_a_token={}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::TransientUnavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { symbol: code });
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::TransientUnavailable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Rejected(format!("HTTP {}", status)));
        }

        let body: QuoteResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Rejected(format!("Failed to parse response: {}", e)))?;

        if body.error_code != 0 {
            return Err(FetchError::Rejected(format!(
                "xueqiu error {}: {}",
                body.error_code,
                body.error_description.unwrap_or_default()
            )));
        }

        match body.data.and_then(|d| d.quote) {
            Some(quote) => Ok(quote.into_quote(&code)),
            None => Err(FetchError::NotFound { symbol: code }),
        }
    }
}
