pub mod tick_store;

pub use tick_store::TickDataStore;

use async_trait::async_trait;
use chrono::NaiveDate;

#[derive(thiserror::Error, Debug)]
pub enum MarketDataError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("unknown data column '{0}'")]
    UnknownColumn(String),
    #[error("invalid date range {from} .. {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
    #[error("csv encoding error: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Time-series collaborator: what columns exist for an instrument, and the rows themselves.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn available_columns(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, MarketDataError>;

    async fn fetch(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
        columns: &[String],
    ) -> Result<Dataset, MarketDataError>;
}

/// Tabular rows as text cells; `None` is a SQL NULL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn head(&self, n: usize) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// RFC 4180 CSV with a header row and `\n` line endings. NULL cells are empty fields.
    pub fn to_csv(&self) -> Result<String, MarketDataError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| MarketDataError::Csv(e.into_error().into()))?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quotes_only_when_needed() {
        let ds = Dataset {
            columns: vec!["time".into(), "note".into()],
            rows: vec![
                vec![Some("2024-01-01".into()), Some("plain".into())],
                vec![Some("2024-01-02".into()), Some("a,\"b\"".into())],
                vec![Some("2024-01-03".into()), None],
            ],
        };
        assert_eq!(
            ds.to_csv().unwrap(),
            "time,note\n2024-01-01,plain\n2024-01-02,\"a,\"\"b\"\"\"\n2024-01-03,\n"
        );
    }

    #[test]
    fn csv_quotes_line_breaks_and_keeps_empty_dataset_header() {
        let ds = Dataset {
            columns: vec!["time".into(), "comment".into()],
            rows: vec![vec![Some("2024-01-01".into()), Some("two\nlines".into())]],
        };
        assert_eq!(ds.to_csv().unwrap(), "time,comment\n2024-01-01,\"two\nlines\"\n");
        assert_eq!(ds.head(0).to_csv().unwrap(), "time,comment\n");
    }

    #[test]
    fn head_keeps_header() {
        let ds = Dataset {
            columns: vec!["time".into()],
            rows: (0..5).map(|i| vec![Some(i.to_string())]).collect(),
        };
        let h = ds.head(2);
        assert_eq!(h.len(), 2);
        assert_eq!(h.columns, ds.columns);
        assert_eq!(ds.head(10).len(), 5);
    }
}
