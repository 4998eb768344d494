use std::str::FromStr;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool};

use crate::config::BackfillConfig;
use crate::error::{LibError, Result};

/// Key of the session advisory lock that keeps backfill runs single-instance.
pub const RUN_LOCK_KEY: i64 = 0x6772_6170_685f_6266;

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

/// Creates the four tables the backfill touches. Production databases already
/// have them; this is for development and tests.
pub async fn create_backfill_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

fn connect_options(config: &BackfillConfig) -> Result<PgConnectOptions> {
    PgConnectOptions::from_str(&config.database_url).map_err(|err| {
        LibError::configuration("DATABASE_URL is not a valid postgres url", anyhow!(err))
    })
}

pub async fn connect(config: &BackfillConfig) -> Result<PgPool> {
    let options = connect_options(config)?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect_with(options)
        .await
        .map_err(|err| LibError::from_read("Failed to connect to postgres", err))
}

/// Holds the run-wide advisory lock on its own connection. Postgres drops the
/// lock when that connection closes, so a crashed run never leaves it behind.
#[derive(Debug)]
pub struct RunLock {
    conn: PgConnection,
}

impl RunLock {
    pub async fn acquire(config: &BackfillConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let mut conn = tokio::time::timeout(
            config.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        .map_err(|_| {
            LibError::connectivity(
                "Timed out connecting to postgres",
                anyhow!("no connection after {:?}", config.connect_timeout),
            )
        })?
        .map_err(|err| LibError::from_read("Failed to connect to postgres", err))?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut conn)
            .await
            .map_err(|err| LibError::from_read("Failed to take the backfill run lock", err))?;

        if acquired.0 {
            tracing::debug!(key = RUN_LOCK_KEY, "acquired backfill run lock");
            Ok(Self { conn })
        } else {
            Err(LibError::configuration_with_code(
                "backfill_already_running",
                "Another backfill run holds the run lock",
                anyhow!("advisory lock {} is held by another session", RUN_LOCK_KEY),
            ))
        }
    }

    pub async fn release(mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(RUN_LOCK_KEY)
            .execute(&mut self.conn)
            .await
            .map_err(|err| LibError::from_read("Failed to release the backfill run lock", err))?;
        self.conn
            .close()
            .await
            .map_err(|err| LibError::from_read("Failed to close the run lock connection", err))?;
        tracing::debug!(key = RUN_LOCK_KEY, "released backfill run lock");
        Ok(())
    }
}
