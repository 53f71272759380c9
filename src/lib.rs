//! Query and mutation layer over a local SQLite mail archive.
//!
//! An [`Archive`] hands out immutable [`Query`] values. Queries compose
//! filters, sort and paginate, group by a dimension ([`Grouping`]) and
//! drill back down from a [`Group`]. Soft delete and label add/remove run
//! against a query's current matches and are recorded in the
//! [`ChangeLog`], whose newest entry can be undone.
//!
//! ```no_run
//! # async fn demo() -> archive_query::Result<()> {
//! use archive_query::{Archive, Filter, GroupField};
//!
//! let archive = Archive::open("archive.db", true).await?;
//! let from_alice = archive
//!     .messages()
//!     .filter([Filter::Sender("alice@example.com".into())])?;
//!
//! for group in from_alice.group_by(GroupField::Year).groups().await? {
//!     println!("{}: {} messages", group.key, group.count);
//! }
//!
//! let log = archive.change_log();
//! from_alice.add_label(&log, "Alice").await?;
//! log.undo_last().await?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod changelog;
mod config;
mod db;
mod error;
mod filter;
mod grouping;
mod models;
mod mutation;
mod query;

pub use archive::Archive;
pub use changelog::{ChangeLog, ChangeLogEntry, Operation};
pub use config::{ArchiveConfig, ArchiveSettings, DataConfig, HOME_ENV};
pub use db::{AccessMode, Database, SqlValue, Statement};
pub use error::{ArchiveError, Result};
pub use filter::{DateValue, Filter, Predicate, SortField};
pub use grouping::{Group, GroupField, GroupSort, Grouping};
pub use models::{Account, Label, Message};
pub use mutation::DEFAULT_LABEL_TYPE;
pub use query::{MessageIter, Query};
