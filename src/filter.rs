//! Filter requests and the predicates they compile to.
//!
//! Every [`Filter`] becomes exactly one [`Predicate`]: a WHERE fragment over
//! the `messages m` alias plus the values bound to its placeholders. A
//! [`Query`](crate::Query) ANDs its predicates together, never ORs them.

use crate::db::SqlValue;
use crate::error::{ArchiveError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// A date bound for `Before`/`After` filters.
#[derive(Debug, Clone, PartialEq)]
pub enum DateValue {
    /// Pre-formatted text such as `2024-01-01` or `2024-01-01T00:00:00Z`.
    /// Compared as-is against the stored ISO-8601 text after validation.
    Text(String),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl DateValue {
    /// Canonical text bound into the query.
    pub fn to_bound_text(&self) -> Result<String> {
        match self {
            DateValue::Text(text) => {
                validate_date_text(text)?;
                Ok(text.clone())
            }
            DateValue::DateTime(dt) => Ok(to_iso(dt)),
            DateValue::Date(date) => Ok(format!("{}T00:00:00Z", date.format("%Y-%m-%d"))),
        }
    }
}

impl From<&str> for DateValue {
    fn from(value: &str) -> Self {
        DateValue::Text(value.to_string())
    }
}

impl From<String> for DateValue {
    fn from(value: String) -> Self {
        DateValue::Text(value)
    }
}

impl From<DateTime<Utc>> for DateValue {
    fn from(value: DateTime<Utc>) -> Self {
        DateValue::DateTime(value)
    }
}

impl From<NaiveDate> for DateValue {
    fn from(value: NaiveDate) -> Self {
        DateValue::Date(value)
    }
}

pub(crate) fn to_iso(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn validate_date_text(text: &str) -> Result<()> {
    let ok = DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::Validation(format!(
            "unparseable date {text:?}; expected YYYY-MM-DD or an ISO-8601 timestamp"
        )))
    }
}

/// One filter request. Patterns use SQL `LIKE` semantics; escaping `%`
/// and `_` is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Sender(String),
    SenderLike(String),
    /// Any recipient type (to, cc, bcc).
    Recipient(String),
    RecipientLike(String),
    /// Sender domain.
    Domain(String),
    Label(String),
    /// Source account identifier.
    Account(String),
    /// `sent_at < value`
    Before(DateValue),
    /// `sent_at >= value`
    After(DateValue),
    /// `size_estimate >= value`
    MinSize(i64),
    /// `size_estimate < value`
    MaxSize(i64),
    HasAttachments(bool),
    SubjectLike(String),
    /// `Some(true)` only deleted, `Some(false)` only alive (the default
    /// when absent), `None` no deletion filter at all.
    IsDeleted(Option<bool>),
}

impl Filter {
    /// Stable textual name of the filter kind.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Sender(_) => "sender",
            Filter::SenderLike(_) => "sender_like",
            Filter::Recipient(_) => "recipient",
            Filter::RecipientLike(_) => "recipient_like",
            Filter::Domain(_) => "domain",
            Filter::Label(_) => "label",
            Filter::Account(_) => "account",
            Filter::Before(_) => "before",
            Filter::After(_) => "after",
            Filter::MinSize(_) => "min_size",
            Filter::MaxSize(_) => "max_size",
            Filter::HasAttachments(_) => "has_attachments",
            Filter::SubjectLike(_) => "subject_like",
            Filter::IsDeleted(_) => "is_deleted",
        }
    }

    /// Compiles the request. `IsDeleted(None)` yields no predicate.
    pub(crate) fn to_predicate(&self) -> Result<Option<Predicate>> {
        let predicate = match self {
            Filter::Sender(addr) => Predicate::new(SENDER_EQ, [addr.as_str().into()]),
            Filter::SenderLike(pat) => Predicate::new(SENDER_LIKE, [pat.as_str().into()]),
            Filter::Recipient(addr) => Predicate::new(RECIPIENT_EQ, [addr.as_str().into()]),
            Filter::RecipientLike(pat) => Predicate::new(RECIPIENT_LIKE, [pat.as_str().into()]),
            Filter::Domain(domain) => Predicate::new(DOMAIN_EQ, [domain.as_str().into()]),
            Filter::Label(name) => Predicate::new(LABEL_EQ, [name.as_str().into()]),
            Filter::Account(ident) => Predicate::new(ACCOUNT_EQ, [ident.as_str().into()]),
            Filter::Before(date) => Predicate::new("m.sent_at < ?", [date.to_bound_text()?.into()]),
            Filter::After(date) => Predicate::new("m.sent_at >= ?", [date.to_bound_text()?.into()]),
            Filter::MinSize(n) => Predicate::new("m.size_estimate >= ?", [non_negative("min_size", *n)?.into()]),
            Filter::MaxSize(n) => Predicate::new("m.size_estimate < ?", [non_negative("max_size", *n)?.into()]),
            Filter::HasAttachments(flag) => Predicate::new("m.has_attachments = ?", [i64::from(*flag).into()]),
            Filter::SubjectLike(pat) => Predicate::new("m.subject LIKE ?", [pat.as_str().into()]),
            Filter::IsDeleted(Some(true)) => Predicate::new("m.deleted_at IS NOT NULL", []),
            Filter::IsDeleted(Some(false)) => Predicate::new("m.deleted_at IS NULL", []),
            Filter::IsDeleted(None) => return Ok(None),
        };
        Ok(Some(predicate))
    }

    /// Whether this request takes over the implicit `deleted_at IS NULL`.
    pub(crate) fn includes_deleted(&self) -> bool {
        matches!(self, Filter::IsDeleted(Some(true)) | Filter::IsDeleted(None))
    }
}

fn non_negative(name: &str, n: i64) -> Result<i64> {
    if n < 0 {
        return Err(ArchiveError::Validation(format!("{name} must be >= 0, got {n}")));
    }
    Ok(n)
}

const SENDER_EQ: &str =
    "EXISTS (SELECT 1 FROM participants p WHERE p.id = m.sender_id AND p.email_address = ?)";
const SENDER_LIKE: &str =
    "EXISTS (SELECT 1 FROM participants p WHERE p.id = m.sender_id AND p.email_address LIKE ?)";
const RECIPIENT_EQ: &str = "EXISTS (SELECT 1 FROM message_recipients mr \
     JOIN participants p ON p.id = mr.participant_id \
     WHERE mr.message_id = m.id AND p.email_address = ?)";
const RECIPIENT_LIKE: &str = "EXISTS (SELECT 1 FROM message_recipients mr \
     JOIN participants p ON p.id = mr.participant_id \
     WHERE mr.message_id = m.id AND p.email_address LIKE ?)";
const DOMAIN_EQ: &str =
    "EXISTS (SELECT 1 FROM participants p WHERE p.id = m.sender_id AND p.domain = ?)";
const LABEL_EQ: &str = "EXISTS (SELECT 1 FROM message_labels ml \
     JOIN labels l ON l.id = ml.label_id \
     WHERE ml.message_id = m.id AND l.name = ?)";
const ACCOUNT_EQ: &str =
    "EXISTS (SELECT 1 FROM sources s WHERE s.id = m.source_id AND s.identifier = ?)";

/// A single bound WHERE fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    clause: String,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub(crate) fn new<const N: usize>(clause: &str, params: [SqlValue; N]) -> Self {
        Self {
            clause: clause.to_string(),
            params: params.into(),
        }
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Message sort fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Date,
    Sender,
    Subject,
    Size,
}

impl SortField {
    pub const ALL: [SortField; 4] = [SortField::Date, SortField::Sender, SortField::Subject, SortField::Size];

    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Date => "date",
            SortField::Sender => "sender",
            SortField::Subject => "subject",
            SortField::Size => "size",
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            SortField::Date => "m.sent_at",
            SortField::Sender => "(SELECT p.email_address FROM participants p WHERE p.id = m.sender_id)",
            SortField::Subject => "m.subject",
            SortField::Size => "m.size_estimate",
        }
    }
}

impl FromStr for SortField {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        SortField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = SortField::ALL.iter().map(|f| f.as_str()).collect();
                ArchiveError::invalid_field("sort", s, &valid)
            })
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
