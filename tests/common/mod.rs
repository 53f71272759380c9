//! Shared fixture: a ten-message archive in a temporary directory.
//!
//! Two accounts, five participants, INBOX/SENT/IMPORTANT labels. Message 10
//! is soft-deleted; message 4 is the only one with attachments (52000 bytes).

#![allow(dead_code)]

use archive_query::{Archive, Query};
use std::path::PathBuf;
use tempfile::TempDir;

const SEED_SQL: &str = r#"
INSERT INTO sources (id, source_type, identifier, display_name) VALUES
    (1, 'gmail', 'test@gmail.com', 'Test User'),
    (2, 'gmail', 'other@gmail.com', 'Other User');

INSERT INTO participants (id, email_address, phone_number, display_name, domain) VALUES
    (1, 'alice@example.com', NULL, 'Alice Smith', 'example.com'),
    (2, 'bob@example.com', NULL, 'Bob Jones', 'example.com'),
    (3, 'noreply@service.com', NULL, NULL, 'service.com'),
    (4, 'admin@example.com', NULL, 'Admin', 'example.com'),
    (5, 'test@gmail.com', NULL, 'Test User', 'gmail.com');

INSERT INTO labels (id, source_id, name, label_type) VALUES
    (1, 1, 'INBOX', 'system'),
    (2, 1, 'SENT', 'system'),
    (3, 1, 'IMPORTANT', 'system');

INSERT INTO conversations (id, source_id, source_conversation_id, conversation_type, title,
                           message_count, last_message_at) VALUES
    (1, 1, 'thread-1', 'email_thread', 'Project Discussion', 6, '2024-06-15T10:00:00Z'),
    (2, 1, 'thread-2', 'email_thread', 'Weekly Report', 4, '2024-03-20T14:00:00Z');

INSERT INTO messages (id, conversation_id, source_id, source_message_id, message_type, sent_at,
                      subject, snippet, sender_id, is_read, is_from_me, has_attachments,
                      size_estimate, deleted_at) VALUES
    (1, 1, 1, 'msg-1', 'email', '2023-01-15T09:00:00Z', 'Hello from Alice', 'Quick hello', 1, 1, 0, 0, 1500, NULL),
    (2, 1, 1, 'msg-2', 'email', '2023-03-20T14:30:00Z', 'Project Update', 'Here is the update', 2, 1, 0, 0, 3200, NULL),
    (3, 1, 1, 'msg-3', 'email', '2023-06-10T08:00:00Z', 'Notification', 'You have a notification', 3, 1, 0, 0, 800, NULL),
    (4, 1, 1, 'msg-4', 'email', '2023-09-01T16:00:00Z', 'Q3 Report', 'Quarterly report attached', 1, 1, 0, 1, 52000, NULL),
    (5, 2, 2, 'msg-5', 'email', '2023-12-25T00:00:00Z', 'Holiday Greetings', 'Happy holidays', 2, 1, 0, 0, 1200, NULL),
    (6, 1, 1, 'msg-6', 'email', '2024-01-10T10:00:00Z', 'New Year Plans', 'Plans for the year', 1, 1, 0, 0, 2100, NULL),
    (7, 1, 1, 'msg-7', 'email', '2024-03-15T11:00:00Z', 'Weekly Summary', 'This week''s summary', 4, 1, 0, 0, 1800, NULL),
    (8, 2, 2, 'msg-8', 'email', '2024-06-01T09:30:00Z', 'Meeting Notes', 'Notes from meeting', 5, 1, 1, 0, 4500, NULL),
    (9, 1, 1, 'msg-9', 'email', '2024-06-15T10:00:00Z', 'Re: Project Discussion', 'Follow up on project', 1, 1, 0, 0, 2800, NULL),
    (10, 1, 1, 'msg-10', 'email', '2024-09-01T08:00:00Z', 'Deleted message', 'This was deleted', 3, 1, 0, 0, 900, '2024-09-02T08:00:00Z');

INSERT INTO message_recipients (message_id, participant_id, recipient_type) VALUES
    (1, 5, 'to'),
    (2, 1, 'to'),
    (2, 4, 'cc'),
    (3, 5, 'to'),
    (4, 5, 'to'),
    (4, 2, 'cc'),
    (5, 1, 'to'),
    (6, 2, 'to'),
    (7, 5, 'to'),
    (8, 1, 'to'),
    (9, 2, 'to'),
    (10, 5, 'to');

INSERT INTO message_labels (message_id, label_id) VALUES
    (1, 1), (2, 1), (2, 3), (3, 1), (4, 1), (4, 3), (5, 1), (6, 2), (7, 1), (8, 2), (9, 1);

INSERT INTO attachments (id, message_id, filename, mime_type, size, content_hash, media_type,
                         storage_path) VALUES
    (1, 4, 'q3-report.pdf', 'application/pdf', 48000, 'abc123def456', 'document', 'ab/abc123def456'),
    (2, 4, 'chart.png', 'image/png', 3200, '789ghi012jkl', 'image', '78/789ghi012jkl');
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub archive: Archive,
}

impl Fixture {
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("archive.db")
    }

    /// Opens a second, read-only handle on the same file.
    pub async fn read_only(&self) -> Archive {
        Archive::open(self.path(), false)
            .await
            .expect("Failed to open archive read-only")
    }

    /// Runs raw SQL against the archive, for test setup only.
    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql)
            .execute(self.archive.database().pool())
            .await
            .expect("Failed to execute setup SQL");
    }
}

/// Creates a writable archive seeded with the fixture data.
pub async fn seeded() -> Fixture {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = Archive::create(dir.path().join("archive.db"))
        .await
        .expect("Failed to create archive");
    let fixture = Fixture { dir, archive };
    fixture.execute(SEED_SQL).await;
    fixture
}

/// Matching ids in ascending order.
pub async fn sorted_ids(query: &Query) -> Vec<i64> {
    let mut ids = query.ids().await.expect("Failed to read ids");
    ids.sort_unstable();
    ids
}
