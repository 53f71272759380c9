use crate::error::{ArchiveError, Result};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions,
};
use sqlx::{Arguments, Executor, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Maximum number of ids bound into a single `IN (...)` list.
pub(crate) const ID_CHUNK: usize = 500;

const DEFAULT_MAX_CONNECTIONS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    Writable,
}

impl AccessMode {
    pub fn from_writable(writable: bool) -> Self {
        if writable {
            AccessMode::Writable
        } else {
            AccessMode::ReadOnly
        }
    }
}

/// Handle on one archive database. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
    mode: AccessMode,
}

impl Database {
    /// Opens an existing archive file.
    pub async fn open(path: &Path, mode: AccessMode, max_connections: Option<u32>) -> Result<Self> {
        if !path.exists() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }
        Self::connect(path, mode, false, max_connections).await
    }

    /// Creates the archive file if needed and applies the schema.
    pub async fn create(path: &Path) -> Result<Self> {
        Self::connect(path, AccessMode::Writable, true, None).await
    }

    async fn connect(
        path: &Path,
        mode: AccessMode,
        create: bool,
        max_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Opening archive {} ({:?})", path.display(), mode);

        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .foreign_keys(true);
        if mode == AccessMode::Writable {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options =
            SqlitePoolOptions::new().max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS));
        if mode == AccessMode::ReadOnly {
            pool_options = pool_options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("PRAGMA query_only = ON").await?;
                    Ok(())
                })
            });
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| ArchiveError::execution(format!("OPEN {}", path.display()), e))?;

        let db = Self {
            pool,
            path: path.to_path_buf(),
            mode,
        };
        if mode == AccessMode::Writable {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| ArchiveError::execution(schema, e))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.mode == AccessMode::Writable
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(ArchiveError::ReadOnly)
        }
    }

    pub(crate) async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| ArchiveError::execution("ACQUIRE", e))
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| ArchiveError::execution("BEGIN", e))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) async fn commit(tx: Transaction<'static, Sqlite>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| ArchiveError::execution("COMMIT", e))
}

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

/// Generated SQL text plus its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub(crate) fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }

    pub(crate) fn arguments<'q>(&self) -> SqliteArguments<'q> {
        let mut args = SqliteArguments::default();
        for value in &self.params {
            match value {
                SqlValue::Null => args.add(Option::<String>::None),
                SqlValue::Text(s) => args.add(s.clone()),
                SqlValue::Integer(i) => args.add(*i),
            }
        }
        args
    }

    pub(crate) fn error(&self, source: sqlx::Error) -> ArchiveError {
        ArchiveError::execution(self.sql.clone(), source)
    }

    pub(crate) async fn fetch_ids(&self, conn: &mut SqliteConnection) -> Result<Vec<i64>> {
        debug!(sql = %self.sql, "fetching ids");
        sqlx::query_scalar_with::<_, i64, _>(&self.sql, self.arguments())
            .fetch_all(conn)
            .await
            .map_err(|e| self.error(e))
    }
}

/// `?, ?, ?` for `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
