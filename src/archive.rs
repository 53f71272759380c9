use crate::changelog::ChangeLog;
use crate::config::ArchiveConfig;
use crate::db::{AccessMode, Database, Statement};
use crate::error::{ArchiveError, Result};
use crate::models::{Account, Label, MESSAGE_COLUMNS, Message};
use crate::query::Query;
use inflections::case::to_title_case;
use std::fmt;
use std::path::Path;

/// An opened archive. Entry point for queries, grouping and mutations.
#[derive(Debug, Clone)]
pub struct Archive {
    db: Database,
}

impl Archive {
    /// Opens an existing archive file. Read-only unless `writable`.
    pub async fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let db = Database::open(path.as_ref(), AccessMode::from_writable(writable), None).await?;
        Ok(Self { db })
    }

    /// Opens the archive `config` resolves to, with its access settings.
    pub async fn open_with(config: &ArchiveConfig, explicit: Option<&Path>) -> Result<Self> {
        let path = config.resolve_database_path(explicit)?;
        let mode = AccessMode::from_writable(config.archive.writable);
        let db = Database::open(&path, mode, config.archive.max_connections).await?;
        Ok(Self { db })
    }

    /// Creates (or upgrades) the archive at `path` and opens it writable.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).await?;
        Ok(Self { db })
    }

    /// Every non-deleted message, newest first.
    pub fn messages(&self) -> Query {
        Query::new(self.db.clone())
    }

    pub fn change_log(&self) -> ChangeLog {
        ChangeLog::new(self.db.clone())
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let sql = "SELECT id, source_type, identifier, display_name, last_sync_at \
                   FROM sources ORDER BY id";
        sqlx::query_as::<_, Account>(sql)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| ArchiveError::execution(sql, e))
    }

    /// All labels, INBOX first and the rest by name.
    pub async fn labels(&self) -> Result<Vec<Label>> {
        let sql = "SELECT id, name, label_type FROM labels ORDER BY name ASC, id ASC";
        let mut labels = sqlx::query_as::<_, Label>(sql)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| ArchiveError::execution(sql, e))?;

        for label in &mut labels {
            label.display_name = to_title_case(&label.name);
        }
        labels.sort_by_key(|label| label.name != "INBOX");
        Ok(labels)
    }

    /// Looks a message up by id, soft-deleted ones included.
    pub async fn message(&self, id: i64) -> Result<Option<Message>> {
        let stmt = Statement::new(
            format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?"),
            vec![id.into()],
        );
        sqlx::query_as_with::<_, Message, _>(&stmt.sql, stmt.arguments())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| stmt.error(e))
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }

    pub fn is_writable(&self) -> bool {
        self.db.is_writable()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_writable() { "writable" } else { "read-only" };
        write!(f, "Archive({}, {mode})", self.path().display())
    }
}
