use crate::config::SinkEnvConfig;
use crate::domain::errors::RoutingError;
use crate::domain::message::NormalizedMessage;
use crate::domain::ports::OutputManager;
use crate::domain::records::SchemaRecord;
use crate::domain::series::InstrumentSeries;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// SQLite pool for one relational destination
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let in_memory = db_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                sqlx::sqlite::SqliteJournalMode::Memory
            } else {
                sqlx::sqlite::SqliteJournalMode::Wal
            });

        // Every in-memory connection is its own database, so keep exactly one alive
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Creates one table per record type
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mbp1 (
                vendor TEXT NOT NULL,
                asset_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                ts_event TEXT NOT NULL,
                bid_px_00 TEXT,
                ask_px_00 TEXT,
                bid_sz_00 INTEGER,
                ask_sz_00 INTEGER,
                bid_ct_00 INTEGER,
                ask_ct_00 INTEGER,
                mid_px_00 TEXT,
                PRIMARY KEY (vendor, symbol, ts_event)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create mbp1 table")?;

        for table in ["ohlcv_1m", "ohlcv_1h", "ohlcv_1d"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    vendor TEXT NOT NULL,
                    asset_type TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    ts_event TEXT NOT NULL,
                    open TEXT NOT NULL,
                    high TEXT NOT NULL,
                    low TEXT NOT NULL,
                    close TEXT NOT NULL,
                    volume INTEGER,
                    PRIMARY KEY (vendor, symbol, ts_event)
                );
                "#
            ))
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create {} table", table))?;
        }

        Ok(())
    }

    /// Upserts one record into its schema table
    pub async fn insert(&self, record: &SchemaRecord) -> Result<()> {
        let columns = record.columns();
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            record.table(),
            names.join(", "),
            vec!["?"; names.len()].join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in columns {
            query = query.bind(value);
        }
        query
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert into {}", record.table()))?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Relational sink. Opens one pool per destination on first use.
pub struct DatabaseOutputManager {
    config: SinkEnvConfig,
    databases: Mutex<HashMap<String, Database>>,
}

impl DatabaseOutputManager {
    pub fn new(config: SinkEnvConfig) -> Self {
        Self {
            config,
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// Pool for `destination`, connecting on first call
    pub async fn database(&self, destination: &str) -> Result<Database> {
        let mut databases = self.databases.lock().await;
        if let Some(db) = databases.get(destination) {
            return Ok(db.clone());
        }
        let url = self.config.database_url_for(destination);
        info!("DatabaseOutputManager: Opening {} -> {}", destination, url);
        let db = Database::new(url).await?;
        databases.insert(destination.to_string(), db.clone());
        Ok(db)
    }
}

#[async_trait]
impl OutputManager for DatabaseOutputManager {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn save(
        &self,
        destination: &str,
        message: &NormalizedMessage,
        series: &InstrumentSeries,
    ) -> Result<(), RoutingError> {
        let record = SchemaRecord::from_message(series.data_schema(), message)?;
        let db = self
            .database(destination)
            .await
            .map_err(|e| RoutingError::sink(destination, format!("{:#}", e)))?;
        db.insert(&record)
            .await
            .map_err(|e| RoutingError::sink(destination, format!("{:#}", e)))
    }
}
