//! Soft delete and label add/remove over a [`Query`].
//!
//! Each operation snapshots the ids it touches, writes one change-log entry
//! and applies the change inside a single transaction.

use crate::changelog::{ChangeLog, Operation};
use crate::db::{self, ID_CHUNK, SqlValue, Statement, placeholders};
use crate::error::{ArchiveError, Result};
use crate::query::Query;
use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info};

/// Type given to labels created by `add_label`.
pub const DEFAULT_LABEL_TYPE: &str = "user";

impl Query {
    /// Soft-deletes every matching message that is still alive.
    ///
    /// Only the ids alive at mutation time are logged and counted, so on a
    /// query that includes deleted rows the return value is the alive
    /// subset, and undo restores exactly those. A query matching nothing
    /// alive writes no log entry and returns 0.
    pub async fn delete(&self, log: &ChangeLog) -> Result<u64> {
        self.db.check_writable()?;
        log.check_same_archive(&self.db)?;
        let mut tx = self.db.begin().await?;

        let matched = self.ids_in(&mut *tx).await?;
        let ids = alive_subset(&mut *tx, &matched).await?;
        if ids.is_empty() {
            debug!("delete matched no live messages");
            return Ok(0);
        }

        let entry_id = log.record(&mut *tx, Operation::Delete, &ids, None, None).await?;
        set_deleted(&mut *tx, &ids, &soft_delete_timestamp()).await?;
        db::commit(tx).await?;

        info!("Soft-deleted {} messages (change {})", ids.len(), entry_id);
        Ok(ids.len() as u64)
    }

    /// Attaches label `name` to every matching message, creating the label
    /// if needed. Returns the number of messages processed, including ones
    /// that already carried the label.
    pub async fn add_label(&self, log: &ChangeLog, name: &str) -> Result<u64> {
        self.db.check_writable()?;
        log.check_same_archive(&self.db)?;
        validate_label_name(name)?;
        let mut tx = self.db.begin().await?;

        let ids = self.ids_in(&mut *tx).await?;
        if ids.is_empty() {
            debug!(label = name, "add_label matched no messages");
            return Ok(0);
        }

        let label_id = match find_label_id(&mut *tx, name).await? {
            Some(id) => id,
            None => create_label(&mut *tx, name).await?,
        };

        // Records every matched id, including ones that already had the
        // label; undoing removes the label from all of them.
        let details = json!({ "label": name, "label_id": label_id });
        let entry_id = log
            .record(&mut *tx, Operation::LabelAdd, &ids, Some(details), None)
            .await?;
        link_label(&mut *tx, label_id, &ids).await?;
        db::commit(tx).await?;

        info!(
            "Added label {:?} to {} messages (change {})",
            name,
            ids.len(),
            entry_id
        );
        Ok(ids.len() as u64)
    }

    /// Detaches label `name` from the matching messages that carry it.
    /// Returns how many associations were removed.
    pub async fn remove_label(&self, log: &ChangeLog, name: &str) -> Result<u64> {
        self.db.check_writable()?;
        log.check_same_archive(&self.db)?;
        let mut tx = self.db.begin().await?;

        let Some(label_id) = find_label_id(&mut *tx, name).await? else {
            debug!(label = name, "remove_label: no such label");
            return Ok(0);
        };

        let matched = self.ids_in(&mut *tx).await?;
        let ids = labelled_subset(&mut *tx, label_id, &matched).await?;
        if ids.is_empty() {
            debug!(label = name, "remove_label matched no labelled messages");
            return Ok(0);
        }

        let details = json!({ "label": name });
        let undo_data = json!({ "label_id": label_id });
        let entry_id = log
            .record(
                &mut *tx,
                Operation::LabelRemove,
                &ids,
                Some(details),
                Some(undo_data),
            )
            .await?;
        unlink_label(&mut *tx, label_id, &ids).await?;
        db::commit(tx).await?;

        info!(
            "Removed label {:?} from {} messages (change {})",
            name,
            ids.len(),
            entry_id
        );
        Ok(ids.len() as u64)
    }
}

fn validate_label_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ArchiveError::Validation("label name must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn soft_delete_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

async fn find_label_id(conn: &mut SqliteConnection, name: &str) -> Result<Option<i64>> {
    let stmt = Statement::new(
        "SELECT id FROM labels WHERE name = ? ORDER BY id LIMIT 1".into(),
        vec![name.into()],
    );
    sqlx::query_scalar_with::<_, i64, _>(&stmt.sql, stmt.arguments())
        .fetch_optional(conn)
        .await
        .map_err(|e| stmt.error(e))
}

async fn create_label(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    let stmt = Statement::new(
        "INSERT INTO labels (name, label_type) VALUES (?, ?)".into(),
        vec![name.into(), DEFAULT_LABEL_TYPE.into()],
    );
    let result = sqlx::query_with(&stmt.sql, stmt.arguments())
        .execute(conn)
        .await
        .map_err(|e| stmt.error(e))?;
    debug!(label = name, "created label");
    Ok(result.last_insert_rowid())
}

/// Runs `build` once per chunk of ids and sums the affected rows.
async fn for_each_chunk<F>(conn: &mut SqliteConnection, ids: &[i64], build: F) -> Result<u64>
where
    F: Fn(&[i64]) -> Statement,
{
    let mut affected = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let stmt = build(chunk);
        let result = sqlx::query_with(&stmt.sql, stmt.arguments())
            .execute(&mut *conn)
            .await
            .map_err(|e| stmt.error(e))?;
        affected += result.rows_affected();
    }
    Ok(affected)
}

/// Runs the id-returning statement `build` produces for each chunk.
async fn select_chunked<F>(conn: &mut SqliteConnection, ids: &[i64], build: F) -> Result<Vec<i64>>
where
    F: Fn(&[i64]) -> Statement,
{
    let mut out = Vec::new();
    for chunk in ids.chunks(ID_CHUNK) {
        out.extend(build(chunk).fetch_ids(&mut *conn).await?);
    }
    Ok(out)
}

fn id_params(ids: &[i64]) -> impl Iterator<Item = SqlValue> + '_ {
    ids.iter().map(|id| SqlValue::Integer(*id))
}

async fn alive_subset(conn: &mut SqliteConnection, ids: &[i64]) -> Result<Vec<i64>> {
    select_chunked(conn, ids, |chunk| {
        Statement::new(
            format!(
                "SELECT id FROM messages WHERE id IN ({}) AND deleted_at IS NULL ORDER BY id",
                placeholders(chunk.len())
            ),
            id_params(chunk).collect(),
        )
    })
    .await
}

async fn labelled_subset(
    conn: &mut SqliteConnection,
    label_id: i64,
    ids: &[i64],
) -> Result<Vec<i64>> {
    select_chunked(conn, ids, |chunk| {
        Statement::new(
            format!(
                "SELECT message_id FROM message_labels \
                 WHERE label_id = ? AND message_id IN ({}) ORDER BY message_id",
                placeholders(chunk.len())
            ),
            std::iter::once(SqlValue::Integer(label_id))
                .chain(id_params(chunk))
                .collect(),
        )
    })
    .await
}

pub(crate) async fn set_deleted(conn: &mut SqliteConnection, ids: &[i64], at: &str) -> Result<u64> {
    for_each_chunk(conn, ids, |chunk| {
        Statement::new(
            format!(
                "UPDATE messages SET deleted_at = ? WHERE id IN ({}) AND deleted_at IS NULL",
                placeholders(chunk.len())
            ),
            std::iter::once(SqlValue::from(at))
                .chain(id_params(chunk))
                .collect(),
        )
    })
    .await
}

pub(crate) async fn clear_deleted(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
    for_each_chunk(conn, ids, |chunk| {
        Statement::new(
            format!(
                "UPDATE messages SET deleted_at = NULL WHERE id IN ({}) AND deleted_at IS NOT NULL",
                placeholders(chunk.len())
            ),
            id_params(chunk).collect(),
        )
    })
    .await
}

pub(crate) async fn link_label(conn: &mut SqliteConnection, label_id: i64, ids: &[i64]) -> Result<u64> {
    for_each_chunk(conn, ids, |chunk| {
        Statement::new(
            format!(
                "INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES {}",
                vec!["(?, ?)"; chunk.len()].join(", ")
            ),
            chunk
                .iter()
                .flat_map(|id| [SqlValue::Integer(*id), SqlValue::Integer(label_id)])
                .collect(),
        )
    })
    .await
}

pub(crate) async fn unlink_label(conn: &mut SqliteConnection, label_id: i64, ids: &[i64]) -> Result<u64> {
    for_each_chunk(conn, ids, |chunk| {
        Statement::new(
            format!(
                "DELETE FROM message_labels WHERE label_id = ? AND message_id IN ({})",
                placeholders(chunk.len())
            ),
            std::iter::once(SqlValue::Integer(label_id))
                .chain(id_params(chunk))
                .collect(),
        )
    })
    .await
}
