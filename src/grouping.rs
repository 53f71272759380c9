//! Aggregation of a [`Query`] by one dimension, and drill-down from a
//! group back to a query selecting exactly its messages.

use crate::db::Statement;
use crate::error::{ArchiveError, Result};
use crate::filter::{Filter, Predicate};
use crate::query::Query;
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupField {
    Sender,
    SenderName,
    Domain,
    Year,
    Month,
    Account,
    Label,
    Recipient,
}

impl GroupField {
    pub const ALL: [GroupField; 8] = [
        GroupField::Sender,
        GroupField::SenderName,
        GroupField::Domain,
        GroupField::Year,
        GroupField::Month,
        GroupField::Account,
        GroupField::Label,
        GroupField::Recipient,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupField::Sender => "sender",
            GroupField::SenderName => "sender_name",
            GroupField::Domain => "domain",
            GroupField::Year => "year",
            GroupField::Month => "month",
            GroupField::Account => "account",
            GroupField::Label => "label",
            GroupField::Recipient => "recipient",
        }
    }

    /// Key expression, evaluated per joined row.
    fn key_expr(self) -> &'static str {
        match self {
            GroupField::Sender => "p.email_address",
            GroupField::SenderName => "COALESCE(p.display_name, p.email_address)",
            GroupField::Domain => "p.domain",
            GroupField::Year => "strftime('%Y', m.sent_at)",
            GroupField::Month => "strftime('%Y-%m', m.sent_at)",
            GroupField::Account => "s.identifier",
            GroupField::Label => "l.name",
            GroupField::Recipient => "rp.email_address",
        }
    }

    /// Joins reaching the key's source table. Outer joins keep messages
    /// without that data; they land in the `""` group.
    fn joins(self) -> &'static str {
        match self {
            GroupField::Sender | GroupField::SenderName | GroupField::Domain => {
                " LEFT JOIN participants p ON p.id = m.sender_id"
            }
            GroupField::Year | GroupField::Month => "",
            GroupField::Account => " LEFT JOIN sources s ON s.id = m.source_id",
            GroupField::Label => {
                " LEFT JOIN message_labels ml ON ml.message_id = m.id \
                 LEFT JOIN labels l ON l.id = ml.label_id"
            }
            GroupField::Recipient => {
                " LEFT JOIN message_recipients mr ON mr.message_id = m.id \
                 LEFT JOIN participants rp ON rp.id = mr.participant_id"
            }
        }
    }

    /// Predicate selecting the messages grouped under the empty key.
    fn missing_predicate(self) -> Predicate {
        let clause = match self {
            GroupField::Sender => {
                "NOT EXISTS (SELECT 1 FROM participants p \
                 WHERE p.id = m.sender_id AND COALESCE(p.email_address, '') <> '')"
            }
            GroupField::SenderName => {
                "NOT EXISTS (SELECT 1 FROM participants p \
                 WHERE p.id = m.sender_id AND COALESCE(p.display_name, p.email_address, '') <> '')"
            }
            GroupField::Domain => {
                "NOT EXISTS (SELECT 1 FROM participants p \
                 WHERE p.id = m.sender_id AND COALESCE(p.domain, '') <> '')"
            }
            GroupField::Year => "COALESCE(strftime('%Y', m.sent_at), '') = ''",
            GroupField::Month => "COALESCE(strftime('%Y-%m', m.sent_at), '') = ''",
            GroupField::Account => {
                "NOT EXISTS (SELECT 1 FROM sources s \
                 WHERE s.id = m.source_id AND COALESCE(s.identifier, '') <> '')"
            }
            GroupField::Label => {
                "(NOT EXISTS (SELECT 1 FROM message_labels ml WHERE ml.message_id = m.id) \
                 OR EXISTS (SELECT 1 FROM message_labels ml LEFT JOIN labels l ON l.id = ml.label_id \
                 WHERE ml.message_id = m.id AND COALESCE(l.name, '') = ''))"
            }
            GroupField::Recipient => {
                "(NOT EXISTS (SELECT 1 FROM message_recipients mr WHERE mr.message_id = m.id) \
                 OR EXISTS (SELECT 1 FROM message_recipients mr \
                 LEFT JOIN participants rp ON rp.id = mr.participant_id \
                 WHERE mr.message_id = m.id AND COALESCE(rp.email_address, '') = ''))"
            }
        };
        Predicate::new(clause, [])
    }
}

impl FromStr for GroupField {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        GroupField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = GroupField::ALL.iter().map(|f| f.as_str()).collect();
                ArchiveError::invalid_field("group", s, &valid)
            })
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort keys for groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSort {
    Key,
    Count,
    TotalSize,
}

impl GroupSort {
    pub const ALL: [GroupSort; 3] = [GroupSort::Key, GroupSort::Count, GroupSort::TotalSize];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupSort::Key => "key",
            GroupSort::Count => "count",
            GroupSort::TotalSize => "total_size",
        }
    }

    fn column(self) -> &'static str {
        match self {
            GroupSort::Key => "grp_key",
            GroupSort::Count => "grp_count",
            GroupSort::TotalSize => "grp_total_size",
        }
    }
}

impl FromStr for GroupSort {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        GroupSort::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = GroupSort::ALL.iter().map(|f| f.as_str()).collect();
                ArchiveError::invalid_field("group sort", s, &valid)
            })
    }
}

impl Query {
    /// Groups the matching messages by `field`. The base query is left
    /// untouched; joins exist only inside the grouping read.
    pub fn group_by(&self, field: GroupField) -> Grouping {
        Grouping {
            base: self.clone(),
            field,
            sort: GroupSort::Count,
            descending: true,
        }
    }
}

/// A query grouped by one dimension. Defaults to count, descending.
#[derive(Debug, Clone)]
pub struct Grouping {
    base: Query,
    field: GroupField,
    sort: GroupSort,
    descending: bool,
}

impl Grouping {
    pub fn field(&self) -> GroupField {
        self.field
    }

    pub fn sort_by(&self, sort: GroupSort, descending: bool) -> Self {
        Self {
            sort,
            descending,
            ..self.clone()
        }
    }

    pub fn to_statement(&self) -> Statement {
        let (where_sql, params) = self.base.where_clause();
        let direction = if self.descending { "DESC" } else { "ASC" };
        // DISTINCT keeps one row per (message, key) so a message counts once
        // even when it reaches the same key through several joined rows.
        let sql = format!(
            "SELECT grp_key, COUNT(*) AS grp_count, \
             COALESCE(SUM(size_estimate), 0) AS grp_total_size \
             FROM (SELECT DISTINCT m.id, m.size_estimate, COALESCE({key}, '') AS grp_key \
             FROM messages m{joins}{where_sql}) \
             GROUP BY grp_key ORDER BY {sort} {direction}, grp_key ASC",
            key = self.field.key_expr(),
            joins = self.field.joins(),
            sort = self.sort.column(),
        );
        Statement::new(sql, params)
    }

    pub async fn groups(&self) -> Result<Vec<Group>> {
        let stmt = self.to_statement();
        debug!(sql = %stmt.sql, field = %self.field, "grouping");
        let rows = sqlx::query_as_with::<_, (String, i64, i64), _>(&stmt.sql, stmt.arguments())
            .fetch_all(self.base.db.pool())
            .await
            .map_err(|e| stmt.error(e))?;

        Ok(rows
            .into_iter()
            .map(|(key, count, total_size)| Group {
                key,
                count,
                total_size,
                base: self.base.clone(),
                field: self.field,
            })
            .collect())
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Grouping(field={}, sort={}{})",
            self.field,
            self.sort.as_str(),
            if self.descending { "_desc" } else { "" }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub key: String,
    pub count: i64,
    pub total_size: i64,
    base: Query,
    field: GroupField,
}

impl Group {
    pub fn field(&self) -> GroupField {
        self.field
    }

    /// The base query narrowed to this group's messages.
    pub fn messages(&self) -> Result<Query> {
        drill_down(&self.base, self.field, &self.key)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Group(key={:?}, count={}, total_size={})",
            self.key, self.count, self.total_size
        )
    }
}

pub(crate) fn drill_down(base: &Query, field: GroupField, key: &str) -> Result<Query> {
    if key.is_empty() {
        return Ok(base.and_predicate(field.missing_predicate()));
    }

    match field {
        GroupField::Sender => base.filter([Filter::Sender(key.to_string())]),
        GroupField::SenderName => Ok(base.and_predicate(Predicate::new(
            "EXISTS (SELECT 1 FROM participants p WHERE p.id = m.sender_id \
             AND COALESCE(p.display_name, p.email_address) GLOB ?)",
            [escape_glob(key).into()],
        ))),
        GroupField::Domain => base.filter([Filter::Domain(key.to_string())]),
        GroupField::Year | GroupField::Month => {
            let (start, end) = key_range(field, key)?;
            base.filter([
                Filter::After(start.format("%Y-%m-%d").to_string().into()),
                Filter::Before(end.format("%Y-%m-%d").to_string().into()),
            ])
        }
        GroupField::Account => base.filter([Filter::Account(key.to_string())]),
        GroupField::Label => base.filter([Filter::Label(key.to_string())]),
        GroupField::Recipient => base.filter([Filter::Recipient(key.to_string())]),
    }
}

/// Half-open date range `[start, end)` covered by a year or month key.
fn key_range(field: GroupField, key: &str) -> Result<(NaiveDate, NaiveDate)> {
    let bad_key = || ArchiveError::Validation(format!("malformed {field} key {key:?}"));

    let (year, month) = match field {
        GroupField::Year => (key.parse::<i32>().map_err(|_| bad_key())?, None),
        GroupField::Month => {
            let (y, m) = key.split_once('-').ok_or_else(bad_key)?;
            let y = y.parse::<i32>().map_err(|_| bad_key())?;
            let m = m.parse::<u32>().map_err(|_| bad_key())?;
            (y, Some(m))
        }
        _ => return Err(bad_key()),
    };

    let (start, end) = match month {
        None => (
            NaiveDate::from_ymd_opt(year, 1, 1),
            NaiveDate::from_ymd_opt(year + 1, 1, 1),
        ),
        Some(12) => (
            NaiveDate::from_ymd_opt(year, 12, 1),
            NaiveDate::from_ymd_opt(year + 1, 1, 1),
        ),
        Some(m) => (
            NaiveDate::from_ymd_opt(year, m, 1),
            NaiveDate::from_ymd_opt(year, m + 1, 1),
        ),
    };
    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(bad_key()),
    }
}

/// Quotes GLOB metacharacters so `value` matches only itself, case
/// included.
fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}
