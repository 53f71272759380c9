use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column list shared by every message SELECT. Order matches [`Message`].
pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.source_id, m.message_type, \
     m.sent_at, m.subject, m.snippet, m.is_read, m.is_from_me, m.has_attachments, \
     m.size_estimate, m.deleted_at, m.sender_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub source_id: Option<i64>,
    pub message_type: Option<String>,
    pub sent_at: Option<String>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub is_read: bool,
    pub is_from_me: bool,
    pub has_attachments: bool,
    pub size_estimate: Option<i64>,
    /// Soft-delete marker; `None` means the message is alive.
    pub deleted_at: Option<String>,
    pub sender_id: Option<i64>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Parses `sent_at` as a UTC timestamp. Accepts RFC 3339 and the
    /// space-separated form SQLite's own date functions emit.
    pub fn sent_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.sent_at.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub label_type: Option<String>, // 'system' or 'user'
    #[sqlx(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub source_type: String,
    pub identifier: String,
    pub display_name: Option<String>,
    pub last_sync_at: Option<String>,
}
