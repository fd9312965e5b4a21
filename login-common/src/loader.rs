//! Transactional bulk loading of `PersistedRow`s into Postgres.
use std::str::FromStr;
use std::time::Instant;

use chrono::NaiveDate;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics_consts::{BATCH_LOAD_TIME, BATCH_ROLLBACKS, ROWS_PERSISTED};
use crate::record::{BatchId, PersistedRow};

/// Enumeration of errors loading a batch. Both carry the identity of the batch they belong to.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{batch}: connection failed with: {error}")]
    Connection { batch: BatchId, error: sqlx::Error },
    #[error("{batch}: insert into {table} failed and the transaction was rolled back: {error}")]
    Persistence {
        batch: BatchId,
        table: String,
        error: sqlx::Error,
    },
}

impl LoadError {
    pub fn batch(&self) -> BatchId {
        match self {
            LoadError::Connection { batch, .. } => *batch,
            LoadError::Persistence { batch, .. } => *batch,
        }
    }
}

/// Appends rows to a fixed table, one connection and one transaction per batch.
#[derive(Debug, Clone)]
pub struct PgLoader {
    options: PgConnectOptions,
    table: String,
}

/// Rows pivoted into one array per column, ready to be bound to `UNNEST`.
#[derive(Default)]
struct ColumnArrays {
    user_ids: Vec<Option<String>>,
    device_types: Vec<Option<String>>,
    masked_ips: Vec<Option<String>>,
    masked_device_ids: Vec<Option<String>>,
    locales: Vec<Option<String>>,
    app_versions: Vec<Option<i32>>,
    create_dates: Vec<NaiveDate>,
}

impl ColumnArrays {
    fn from_rows(rows: &[PersistedRow]) -> Self {
        let mut arrays = ColumnArrays::default();
        for row in rows {
            let record = row.record();
            arrays.user_ids.push(record.user_id.clone());
            arrays.device_types.push(record.device_type.clone());
            arrays.masked_ips.push(record.masked_ip.clone());
            arrays.masked_device_ids.push(record.masked_device_id.clone());
            arrays.locales.push(record.locale.clone());
            arrays.app_versions.push(record.app_version);
            arrays.create_dates.push(record.create_date);
        }
        arrays
    }
}

impl PgLoader {
    pub fn new(options: PgConnectOptions, table: &str) -> Self {
        Self {
            options,
            table: table.to_owned(),
        }
    }

    /// Parse a DSN without connecting. Connections are only opened by `load`.
    pub fn from_url(url: &str, table: &str) -> Result<Self, sqlx::Error> {
        Ok(Self::new(PgConnectOptions::from_str(url)?, table))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert every row of a batch inside a single transaction.
    /// Either all rows are committed or none are. The connection is closed on every exit path.
    pub async fn load(&self, batch: BatchId, rows: &[PersistedRow]) -> Result<u64, LoadError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();

        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|error| LoadError::Connection { batch, error })?;
        info!(%batch, "established connection to the database");

        let result = self.append_in_transaction(&mut conn, batch, rows).await;

        if let Err(error) = conn.close().await {
            warn!(%batch, "failed to close database connection cleanly: {}", error);
        }

        let labels = [("table", self.table.clone())];
        metrics::histogram!(BATCH_LOAD_TIME, &labels).record(start.elapsed().as_millis() as f64);
        match &result {
            Ok(inserted) => {
                metrics::counter!(ROWS_PERSISTED, &labels).increment(*inserted);
                info!(%batch, rows = *inserted, "{} has been successfully committed", self.table);
            }
            Err(_) => {
                metrics::counter!(BATCH_ROLLBACKS, &labels).increment(1);
            }
        }

        result
    }

    async fn append_in_transaction(
        &self,
        conn: &mut PgConnection,
        batch: BatchId,
        rows: &[PersistedRow],
    ) -> Result<u64, LoadError> {
        let persistence_error = |error: sqlx::Error| LoadError::Persistence {
            batch,
            table: self.table.clone(),
            error,
        };

        let mut txn = conn.begin().await.map_err(persistence_error)?;

        let query = format!(
            r#"
INSERT INTO "{}"
    (user_id, device_type, masked_ip, masked_device_id, locale, app_version, create_date)
SELECT * FROM UNNEST(
    $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::int[], $7::date[]
)
            "#,
            &self.table
        );

        let arrays = ColumnArrays::from_rows(rows);
        let inserted = sqlx::query(&query)
            .bind(&arrays.user_ids)
            .bind(&arrays.device_types)
            .bind(&arrays.masked_ips)
            .bind(&arrays.masked_device_ids)
            .bind(&arrays.locales)
            .bind(&arrays.app_versions)
            .bind(&arrays.create_dates)
            .execute(&mut *txn)
            .await;

        match inserted {
            Ok(result) => {
                txn.commit().await.map_err(persistence_error)?;
                Ok(result.rows_affected())
            }
            Err(error) => {
                warn!(%batch, "insert failed, rolling back: {}", error);
                if let Err(rollback_error) = txn.rollback().await {
                    // Dropping the connection aborts the transaction server side anyway.
                    warn!(%batch, "rollback failed: {}", rollback_error);
                }
                Err(persistence_error(error))
            }
        }
    }
}
