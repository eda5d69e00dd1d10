use crate::market::{Dataset, MarketDataError, MarketDataSource};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use log::debug;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement, Value};
use std::sync::Arc;

const TABLE: &str = "tick_data";
const TIME_COLUMN: &str = "time";
const TICKER_COLUMN: &str = "ticker";

/// Reads the `tick_data` table. Column names come from `PRAGMA table_info` and are the only
/// identifiers ever interpolated into SQL.
#[derive(Clone)]
pub struct TickDataStore {
    db: Arc<DatabaseConnection>,
}

impl TickDataStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn table_columns(&self) -> Result<Vec<String>, MarketDataError> {
        let backend = self.db.get_database_backend();
        let rows = self
            .db
            .query_all(Statement::from_string(
                backend,
                format!("PRAGMA table_info({TABLE});"),
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<String>("", "name").ok())
            .filter(|n| n != TICKER_COLUMN)
            .collect())
    }

    fn range_values(
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Value>, MarketDataError> {
        if from > to {
            return Err(MarketDataError::InvalidRange { from, to });
        }
        // `to` is inclusive; timestamps are ISO text so the bound is the next day
        let end = to + Duration::days(1);
        Ok(vec![
            instrument.into(),
            from.format("%Y-%m-%d").to_string().into(),
            end.format("%Y-%m-%d").to_string().into(),
        ])
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl MarketDataSource for TickDataStore {
    async fn available_columns(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, MarketDataError> {
        let backend = self.db.get_database_backend();
        let mut out = Vec::new();
        for col in self.table_columns().await? {
            let sql = format!(
                "SELECT COUNT({}) AS n FROM {TABLE} WHERE {TICKER_COLUMN} = ? AND {TIME_COLUMN} >= ? AND {TIME_COLUMN} < ?",
                quote_ident(&col)
            );
            let row = self
                .db
                .query_one(Statement::from_sql_and_values(
                    backend,
                    sql,
                    Self::range_values(instrument, from, to)?,
                ))
                .await?;
            let n = row
                .and_then(|r| r.try_get::<i64>("", "n").ok())
                .unwrap_or(0);
            if n > 0 {
                out.push(col);
            }
        }
        debug!("{} columns available for {}: {:?}", out.len(), instrument, out);
        Ok(out)
    }

    async fn fetch(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
        columns: &[String],
    ) -> Result<Dataset, MarketDataError> {
        let known = self.table_columns().await?;

        let mut selected = vec![TIME_COLUMN.to_string()];
        for c in columns {
            let c = c.trim();
            if !known.iter().any(|k| k == c) {
                return Err(MarketDataError::UnknownColumn(c.to_string()));
            }
            if !selected.iter().any(|s| s == c) {
                selected.push(c.to_string());
            }
        }

        let projection = selected
            .iter()
            .map(|c| format!("CAST({0} AS TEXT) AS {0}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {projection} FROM {TABLE} WHERE {TICKER_COLUMN} = ? AND {TIME_COLUMN} >= ? AND {TIME_COLUMN} < ? ORDER BY {TIME_COLUMN}"
        );

        let backend = self.db.get_database_backend();
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(
                backend,
                sql,
                Self::range_values(instrument, from, to)?,
            ))
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(selected.len());
            for c in &selected {
                cells.push(row.try_get::<Option<String>>("", c)?);
            }
            out.push(cells);
        }

        debug!(
            "fetched {} rows x {} columns for {}",
            out.len(),
            selected.len(),
            instrument
        );
        Ok(Dataset {
            columns: selected,
            rows: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::establish_connection;

    async fn seeded() -> (tempfile::TempDir, TickDataStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ticks.db").display());
        let db = establish_connection(&url).await.unwrap();
        db.execute(Statement::from_string(
            db.get_database_backend(),
            "INSERT INTO tick_data (ticker, time, open, close, volume) VALUES \
             ('NIFTY', '2024-01-02 09:15:00', 100.0, 101.5, NULL), \
             ('NIFTY', '2024-01-01 09:15:00', 99.0, 100.0, NULL), \
             ('NIFTY', '2024-02-01 09:15:00', 105.0, 104.0, NULL), \
             ('BANK', '2024-01-01 09:15:00', 1.0, 2.0, 500.0);"
                .to_string(),
        ))
        .await
        .unwrap();
        (dir, TickDataStore::new(Arc::new(db)))
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn available_columns_skip_empty_ones() {
        let (_dir, store) = seeded().await;
        let cols = store
            .available_columns("NIFTY", d("2024-01-01"), d("2024-01-31"))
            .await
            .unwrap();
        assert_eq!(cols, vec!["time", "open", "close"]);
    }

    #[tokio::test]
    async fn fetch_orders_by_time_and_puts_time_first() {
        let (_dir, store) = seeded().await;
        let ds = store
            .fetch(
                "NIFTY",
                d("2024-01-01"),
                d("2024-01-02"),
                &["close".to_string(), "time".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(ds.columns, vec!["time", "close"]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows[0][0].as_deref(), Some("2024-01-01 09:15:00"));
        assert_eq!(ds.rows[1][1].as_deref(), Some("101.5"));
    }

    #[tokio::test]
    async fn fetch_rejects_unknown_columns() {
        let (_dir, store) = seeded().await;
        let err = store
            .fetch(
                "NIFTY",
                d("2024-01-01"),
                d("2024-01-02"),
                &["close; DROP TABLE tick_data".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::UnknownColumn(_)));
    }
}
