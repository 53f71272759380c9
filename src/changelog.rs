//! Append-only log of mutations with stepwise undo.
//!
//! Entries are written inside the transaction of the mutation they
//! describe. `undo_last` inverts the most recent entry not yet undone and
//! marks it, so each entry is undone at most once. Undone entries stay as
//! audit history.

use crate::db::{self, Database, SqlValue, Statement};
use crate::error::{ArchiveError, Result};
use crate::mutation::{clear_deleted, link_label, unlink_label};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

const ENTRY_COLUMNS: &str =
    "id, operation, message_ids, details, undo_data, created_at, undone_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Delete,
    LabelAdd,
    LabelRemove,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Delete => "delete",
            Operation::LabelAdd => "label_add",
            Operation::LabelRemove => "label_remove",
        }
    }
}

impl FromStr for Operation {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delete" => Ok(Operation::Delete),
            "label_add" => Ok(Operation::LabelAdd),
            "label_remove" => Ok(Operation::LabelRemove),
            _ => Err(ArchiveError::invalid_field(
                "operation",
                s,
                &["delete", "label_add", "label_remove"],
            )),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub operation: Operation,
    pub message_ids: Vec<i64>,
    pub details: Option<Value>,
    pub undo_data: Option<Value>,
    pub created_at: String,
    pub undone: bool,
}

impl ChangeLogEntry {
    pub fn message_count(&self) -> usize {
        self.message_ids.len()
    }

    /// Label id the inverse of a label operation needs.
    fn label_id(&self) -> Result<i64> {
        let source = match self.operation {
            Operation::LabelAdd => self.details.as_ref(),
            Operation::LabelRemove => self.undo_data.as_ref(),
            Operation::Delete => None,
        };
        source
            .and_then(|v| v.get("label_id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| ArchiveError::CorruptEntry {
                id: self.id,
                reason: format!("{} entry has no label_id", self.operation),
            })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChangeLogRow {
    id: i64,
    operation: String,
    message_ids: String,
    details: Option<String>,
    undo_data: Option<String>,
    created_at: String,
    undone_at: Option<String>,
}

impl TryFrom<ChangeLogRow> for ChangeLogEntry {
    type Error = ArchiveError;

    fn try_from(row: ChangeLogRow) -> Result<Self> {
        let id = row.id;
        let corrupt = |reason: String| ArchiveError::CorruptEntry { id, reason };
        let parse_json = |text: Option<String>| -> Result<Option<Value>> {
            text.map(|t| serde_json::from_str(&t))
                .transpose()
                .map_err(|e| corrupt(e.to_string()))
        };

        Ok(ChangeLogEntry {
            id,
            operation: row.operation.parse().map_err(|e: ArchiveError| corrupt(e.to_string()))?,
            message_ids: serde_json::from_str(&row.message_ids).map_err(|e| corrupt(e.to_string()))?,
            details: parse_json(row.details)?,
            undo_data: parse_json(row.undo_data)?,
            created_at: row.created_at,
            undone: row.undone_at.is_some(),
        })
    }
}

/// The change log of one archive. Mutations take it explicitly.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    db: Database,
}

impl ChangeLog {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fails unless this log lives in the same archive file as `db`.
    pub(crate) fn check_same_archive(&self, db: &Database) -> Result<()> {
        if self.db.path() == db.path() {
            Ok(())
        } else {
            Err(ArchiveError::Validation(format!(
                "change log of {} cannot record changes to {}",
                self.db.path().display(),
                db.path().display()
            )))
        }
    }

    /// Appends an entry on `conn`, which must be the connection of the
    /// transaction applying the change. Returns the new entry id.
    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        operation: Operation,
        message_ids: &[i64],
        details: Option<Value>,
        undo_data: Option<Value>,
    ) -> Result<i64> {
        self.db.check_writable()?;

        let ids_json = serde_json::to_string(message_ids)
            .map_err(|e| ArchiveError::Validation(format!("encoding message ids: {e}")))?;
        let mut params: Vec<SqlValue> = vec![operation.as_str().into(), ids_json.into()];
        params.push(details.map(|v| v.to_string()).into());
        params.push(undo_data.map(|v| v.to_string()).into());
        params.push(Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string().into());

        let stmt = Statement::new(
            "INSERT INTO change_log (operation, message_ids, details, undo_data, created_at) \
             VALUES (?, ?, ?, ?, ?)"
                .into(),
            params,
        );
        let result = sqlx::query_with(&stmt.sql, stmt.arguments())
            .execute(conn)
            .await
            .map_err(|e| stmt.error(e))?;
        Ok(result.last_insert_rowid())
    }

    /// The entry `undo_last` would invert: the most recent one not yet
    /// undone.
    pub async fn last(&self) -> Result<Option<ChangeLogEntry>> {
        let mut conn = self.db.acquire().await?;
        newest_pending(&mut *conn).await
    }

    /// Newest entries first, undone ones included.
    pub async fn history(&self, limit: u32) -> Result<Vec<ChangeLogEntry>> {
        let stmt = Statement::new(
            format!("SELECT {ENTRY_COLUMNS} FROM change_log ORDER BY id DESC LIMIT ?"),
            vec![i64::from(limit).into()],
        );
        let rows = sqlx::query_as_with::<_, ChangeLogRow, _>(&stmt.sql, stmt.arguments())
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| stmt.error(e))?;
        rows.into_iter().map(ChangeLogEntry::try_from).collect()
    }

    /// Inverts the most recent entry not yet undone and marks it undone,
    /// in one transaction.
    pub async fn undo_last(&self) -> Result<ChangeLogEntry> {
        self.db.check_writable()?;
        let mut tx = self.db.begin().await?;

        let Some(mut entry) = newest_pending(&mut *tx).await? else {
            return Err(ArchiveError::NothingToUndo);
        };

        let restored = match entry.operation {
            Operation::Delete => clear_deleted(&mut *tx, &entry.message_ids).await?,
            Operation::LabelAdd => {
                unlink_label(&mut *tx, entry.label_id()?, &entry.message_ids).await?
            }
            Operation::LabelRemove => {
                link_label(&mut *tx, entry.label_id()?, &entry.message_ids).await?
            }
        };
        if restored as usize != entry.message_count() {
            warn!(
                "Undo of change {} touched {} of {} messages",
                entry.id,
                restored,
                entry.message_count()
            );
        }

        let stmt = Statement::new(
            "UPDATE change_log SET undone_at = ? WHERE id = ? AND undone_at IS NULL".into(),
            vec![
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string().into(),
                entry.id.into(),
            ],
        );
        sqlx::query_with(&stmt.sql, stmt.arguments())
            .execute(&mut *tx)
            .await
            .map_err(|e| stmt.error(e))?;
        db::commit(tx).await?;

        entry.undone = true;
        info!(
            "Undid {} change {} ({} messages)",
            entry.operation,
            entry.id,
            entry.message_count()
        );
        Ok(entry)
    }
}

async fn newest_pending(conn: &mut SqliteConnection) -> Result<Option<ChangeLogEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM change_log WHERE undone_at IS NULL ORDER BY id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, ChangeLogRow>(&sql)
        .fetch_optional(conn)
        .await
        .map_err(|e| ArchiveError::execution(sql.clone(), e))?;
    row.map(ChangeLogEntry::try_from).transpose()
}
