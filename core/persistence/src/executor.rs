use diesel::connection::{Connection, SimpleConnection};
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::SqliteConnection;
use std::path::Path;

pub type InnerConnType = SqliteConnection;
pub type PoolType = Pool<ConnectionManager<InnerConnType>>;
pub type ConnType = PooledConnection<ConnectionManager<InnerConnType>>;

const CONNECTION_INIT: &str = "PRAGMA synchronous = NORMAL; \
    PRAGMA journal_mode = WAL; \
    PRAGMA foreign_keys = ON; \
    PRAGMA busy_timeout = 15000;";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("DB connection error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("DB query error: {0}")]
    Diesel(#[from] diesel::result::Error),
    #[error("DB task: {0}")]
    RuntimeError(#[from] tokio::task::JoinError),
}

pub trait AsDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self;
}

#[derive(Debug)]
struct ConnectionInit;

impl CustomizeConnection<InnerConnType, diesel::r2d2::Error> for ConnectionInit {
    fn on_acquire(&self, conn: &mut InnerConnType) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(CONNECTION_INIT)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct DbExecutor {
    pub pool: PoolType,
}

impl DbExecutor {
    pub fn new<S: Into<String>>(database_url: S) -> Result<Self, Error> {
        Self::with_pool_size(database_url, 10)
    }

    pub fn with_pool_size<S: Into<String>>(database_url: S, max_size: u32) -> Result<Self, Error> {
        let database_url = database_url.into();
        log::debug!("Opening database [{}] (pool size: {})", database_url, max_size);

        let manager = ConnectionManager::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ConnectionInit))
            .build(manager)?;
        Ok(DbExecutor { pool })
    }

    pub fn from_data_dir(data_dir: &Path, name: &str) -> Result<Self, Error> {
        let db = data_dir.join(name).with_extension("db");
        Self::new(db.to_string_lossy())
    }

    pub fn conn(&self) -> Result<ConnType, Error> {
        Ok(self.pool.get()?)
    }

    pub fn as_dao<'a, T: AsDao<'a>>(&'a self) -> T {
        AsDao::as_dao(&self.pool)
    }

    /// Runs an embedded migration set and forwards its report to the log.
    pub fn apply_migration<T, E, F>(&self, migration: F) -> anyhow::Result<T>
    where
        F: FnOnce(&InnerConnType, &mut dyn std::io::Write) -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let conn = self.conn()?;
        let mut report = Vec::new();
        let result = migration(&conn, &mut report);

        for line in String::from_utf8_lossy(&report).lines() {
            log::info!("Migration: {}", line);
        }
        Ok(result?)
    }
}

pub async fn do_with_transaction<R, Error, F>(pool: &PoolType, f: F) -> Result<R, Error>
where
    F: FnOnce(&ConnType) -> Result<R, Error> + Send + 'static,
    Error: Send + 'static + From<tokio::task::JoinError> + From<r2d2::Error> + From<diesel::result::Error>,
    R: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        conn.transaction(|| f(&conn))
    })
    .await?
}

pub async fn readonly_transaction<R, Error, F>(pool: &PoolType, f: F) -> Result<R, Error>
where
    F: FnOnce(&ConnType) -> Result<R, Error> + Send + 'static,
    Error: Send + 'static + From<tokio::task::JoinError> + From<r2d2::Error> + From<diesel::result::Error>,
    R: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await?
}
