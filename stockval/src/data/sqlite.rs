//! SQLite-backed stock repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::repository::{RepositoryError, StockRepository};
use super::{Segment, StockRecord};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    name TEXT NOT NULL,
    book_value_per_share REAL,
    roe REAL,
    perpetual_growth_rate REAL NOT NULL DEFAULT 0.03,
    required_return_rate REAL NOT NULL DEFAULT 0.10,
    current_pe REAL,
    current_price REAL,
    change_percent REAL,
    volume REAL,
    market_cap REAL,
    pe_ratio_lower REAL,
    pe_ratio_mid REAL,
    pe_ratio_upper REAL,
    theoretical_price_lower REAL,
    theoretical_price_mid REAL,
    theoretical_price_upper REAL,
    auto_update INTEGER NOT NULL DEFAULT 1,
    last_updated TEXT NOT NULL,
    UNIQUE(symbol, market)
);

CREATE INDEX IF NOT EXISTS idx_stocks_market_auto
ON stocks(market, auto_update);
"#;

const SELECT_COLUMNS: &str = "symbol, market, name, book_value_per_share, roe, \
    perpetual_growth_rate, required_return_rate, current_pe, current_price, \
    change_percent, volume, market_cap, pe_ratio_lower, pe_ratio_mid, pe_ratio_upper, \
    theoretical_price_lower, theoretical_price_mid, theoretical_price_upper, \
    auto_update, last_updated";

const UPSERT_SQL: &str = r#"
INSERT INTO stocks (
    symbol, market, name, book_value_per_share, roe,
    perpetual_growth_rate, required_return_rate, current_pe, current_price,
    change_percent, volume, market_cap, pe_ratio_lower, pe_ratio_mid, pe_ratio_upper,
    theoretical_price_lower, theoretical_price_mid, theoretical_price_upper,
    auto_update, last_updated
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
ON CONFLICT(symbol, market) DO UPDATE SET
    name = excluded.name,
    book_value_per_share = excluded.book_value_per_share,
    roe = excluded.roe,
    perpetual_growth_rate = excluded.perpetual_growth_rate,
    required_return_rate = excluded.required_return_rate,
    current_pe = excluded.current_pe,
    current_price = excluded.current_price,
    change_percent = excluded.change_percent,
    volume = excluded.volume,
    market_cap = excluded.market_cap,
    pe_ratio_lower = excluded.pe_ratio_lower,
    pe_ratio_mid = excluded.pe_ratio_mid,
    pe_ratio_upper = excluded.pe_ratio_upper,
    theoretical_price_lower = excluded.theoretical_price_lower,
    theoretical_price_mid = excluded.theoretical_price_mid,
    theoretical_price_upper = excluded.theoretical_price_upper,
    auto_update = excluded.auto_update,
    last_updated = excluded.last_updated
"#;

impl ToSql for Segment {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.key()))
    }
}

impl FromSql for Segment {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(..) => Self::Corrupt(err.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StockRecord> {
    let last_updated: String = row.get(19)?;
    Ok(StockRecord {
        symbol: row.get(0)?,
        market: row.get(1)?,
        name: row.get(2)?,
        book_value_per_share: row.get(3)?,
        roe: row.get(4)?,
        perpetual_growth_rate: row.get(5)?,
        required_return_rate: row.get(6)?,
        current_pe: row.get(7)?,
        current_price: row.get(8)?,
        change_percent: row.get(9)?,
        volume: row.get(10)?,
        market_cap: row.get(11)?,
        pe_ratio_lower: row.get(12)?,
        pe_ratio_mid: row.get(13)?,
        pe_ratio_upper: row.get(14)?,
        theoretical_price_lower: row.get(15)?,
        theoretical_price_mid: row.get(16)?,
        theoretical_price_upper: row.get(17)?,
        auto_update: row.get(18)?,
        last_updated: parse_timestamp(19, &last_updated)?,
    })
}

// ============================================================================
// SQLite Repository
// ============================================================================

/// Stock records in a single SQLite table.
pub struct SqliteRepository {
    /// rusqlite::Connection is Send but not Sync, so it sits behind a Mutex
    db: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::Backend(format!("create {}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CREATE_TABLES_SQL)?;

        info!(db_path = %path.display(), "Opened stock database");
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }
}

#[async_trait]
impl StockRepository for SqliteRepository {
    async fn list(&self, market: Segment) -> Result<Vec<String>, RepositoryError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare_cached(
            "SELECT symbol FROM stocks WHERE market = ?1 AND auto_update = 1 ORDER BY symbol",
        )?;
        let symbols = stmt
            .query_map(params![market], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    async fn list_all(&self, market: Segment) -> Result<Vec<String>, RepositoryError> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare_cached("SELECT symbol FROM stocks WHERE market = ?1 ORDER BY symbol")?;
        let symbols = stmt
            .query_map(params![market], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    async fn get(
        &self,
        symbol: &str,
        market: Segment,
    ) -> Result<Option<StockRecord>, RepositoryError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM stocks WHERE symbol = ?1 AND market = ?2",
            SELECT_COLUMNS
        );
        let record = db
            .query_row(&sql, params![symbol, market], row_to_record)
            .optional()?;
        Ok(record)
    }

    async fn records(&self, market: Option<Segment>) -> Result<Vec<StockRecord>, RepositoryError> {
        let db = self.db.lock().await;
        let records = match market {
            Some(m) => {
                let sql = format!(
                    "SELECT {} FROM stocks WHERE market = ?1 ORDER BY symbol",
                    SELECT_COLUMNS
                );
                let mut stmt = db.prepare(&sql)?;
                let rows = stmt.query_map(params![m], row_to_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM stocks ORDER BY market, symbol",
                    SELECT_COLUMNS
                );
                let mut stmt = db.prepare(&sql)?;
                let rows = stmt.query_map([], row_to_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    async fn upsert(&self, record: &StockRecord) -> Result<(), RepositoryError> {
        let db = self.db.lock().await;
        db.execute(
            UPSERT_SQL,
            params![
                record.symbol,
                record.market,
                record.name,
                record.book_value_per_share,
                record.roe,
                record.perpetual_growth_rate,
                record.required_return_rate,
                record.current_pe,
                record.current_price,
                record.change_percent,
                record.volume,
                record.market_cap,
                record.pe_ratio_lower,
                record.pe_ratio_mid,
                record.pe_ratio_upper,
                record.theoretical_price_lower,
                record.theoretical_price_mid,
                record.theoretical_price_upper,
                record.auto_update,
                record.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, symbol: &str, market: Segment) -> Result<bool, RepositoryError> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM stocks WHERE symbol = ?1 AND market = ?2",
            params![symbol, market],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(symbol: &str, market: Segment) -> StockRecord {
        let mut record = StockRecord::new(symbol, market);
        record.name = format!("{} Inc", symbol);
        record.book_value_per_share = Some(133.1);
        record.roe = Some(0.25);
        record.current_pe = Some(11.2);
        record
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("stocks.db");
        let repo = SqliteRepository::open(&path).unwrap();
        assert!(path.exists());
        assert!(repo.records(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_roundtrip_and_conflict_update() {
        let dir = tempdir().unwrap();
        let repo = SqliteRepository::open(&dir.path().join("stocks.db")).unwrap();

        let mut record = sample("600519", Segment::AShare);
        repo.upsert(&record).await.unwrap();

        record.current_price = Some(1520.5);
        record.pe_ratio_lower = Some(9.8);
        repo.upsert(&record).await.unwrap();

        let stored = repo.get("600519", Segment::AShare).await.unwrap().unwrap();
        assert_eq!(stored.current_price, Some(1520.5));
        assert_eq!(stored.pe_ratio_lower, Some(9.8));
        assert_eq!(stored.market, Segment::AShare);
        assert_eq!(
            stored.last_updated.timestamp_millis(),
            record.last_updated.timestamp_millis()
        );
        assert_eq!(repo.records(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_symbol_in_two_segments() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert(&sample("00700", Segment::HShare)).await.unwrap();
        repo.upsert(&sample("00700", Segment::AShare)).await.unwrap();

        assert_eq!(repo.records(Some(Segment::HShare)).await.unwrap().len(), 1);
        assert_eq!(repo.records(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_skips_paused_records() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut paused = sample("MSFT", Segment::UsShare);
        paused.auto_update = false;
        repo.upsert(&paused).await.unwrap();
        repo.upsert(&sample("AAPL", Segment::UsShare)).await.unwrap();

        assert_eq!(repo.list(Segment::UsShare).await.unwrap(), vec!["AAPL"]);
        assert_eq!(
            repo.list_all(Segment::UsShare).await.unwrap(),
            vec!["AAPL", "MSFT"]
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert(&sample("AAPL", Segment::UsShare)).await.unwrap();

        assert!(repo.delete("AAPL", Segment::UsShare).await.unwrap());
        assert!(!repo.delete("AAPL", Segment::UsShare).await.unwrap());
        assert!(repo.get("AAPL", Segment::UsShare).await.unwrap().is_none());
    }
}
