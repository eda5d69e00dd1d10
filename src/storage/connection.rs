use crate::storage::entity::{backtest_request, pipeline_job};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Schema,
    Statement,
};
use std::collections::HashSet;
use std::time::Duration;

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(10)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(60))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    if db.get_database_backend() == DatabaseBackend::Sqlite {
        exec_raw(&db, "PRAGMA journal_mode=WAL;").await?;
        exec_raw(&db, "PRAGMA busy_timeout=5000;").await?;
    }

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmt = builder.build(
        schema
            .create_table_from_entity(backtest_request::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;
    ensure_backtest_requests_columns(&db).await?;

    let stmt = builder.build(
        schema
            .create_table_from_entity(pipeline_job::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    exec_raw(
        &db,
        "CREATE INDEX IF NOT EXISTS idx_backtest_requests_owner ON backtest_requests(owner_id, created_at);",
    )
    .await?;
    exec_raw(
        &db,
        "CREATE INDEX IF NOT EXISTS idx_pipeline_jobs_claim ON pipeline_jobs(status, next_run_at);",
    )
    .await?;

    // market data lives next to the pipeline tables; rows are loaded by an external importer
    exec_raw(
        &db,
        "CREATE TABLE IF NOT EXISTS tick_data (\
            ticker TEXT NOT NULL, \
            time TEXT NOT NULL, \
            open REAL, high REAL, low REAL, close REAL, volume REAL);",
    )
    .await?;
    exec_raw(
        &db,
        "CREATE INDEX IF NOT EXISTS idx_tick_data_ticker_time ON tick_data(ticker, time);",
    )
    .await?;

    info!("database ready at {} (WAL, tables initialized)", db_url);

    Ok(db)
}

async fn exec_raw(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?;
    Ok(())
}

/// Databases created before the lease and durable attempt counter existed lack these columns.
async fn ensure_backtest_requests_columns(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    if backend != DatabaseBackend::Sqlite {
        return Ok(());
    }

    let rows = db
        .query_all(Statement::from_string(
            backend,
            "PRAGMA table_info(backtest_requests);".to_string(),
        ))
        .await?;

    let mut cols = HashSet::new();
    for row in rows {
        if let Ok(name) = row.try_get::<String>("", "name") {
            cols.insert(name);
        }
    }

    let wanted = [
        ("validation_attempts", "INTEGER NOT NULL DEFAULT 0"),
        ("attempt_history", "TEXT"),
        ("version", "INTEGER NOT NULL DEFAULT 0"),
        ("lease_token", "TEXT"),
        ("leased_at", "BIGINT"),
    ];
    for (name, ddl) in wanted {
        if !cols.contains(name) {
            info!("adding missing column backtest_requests.{}", name);
            exec_raw(
                db,
                &format!("ALTER TABLE backtest_requests ADD COLUMN {name} {ddl};"),
            )
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_tables_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let db = establish_connection(&url).await.unwrap();
        drop(db);
        let db = establish_connection(&url).await.unwrap();

        let rows = db
            .query_all(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name;".to_string(),
            ))
            .await
            .unwrap();
        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.try_get::<String>("", "name").ok())
            .collect();
        assert!(names.contains(&"backtest_requests".to_string()));
        assert!(names.contains(&"pipeline_jobs".to_string()));
        assert!(names.contains(&"tick_data".to_string()));
    }
}
