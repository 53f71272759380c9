use crate::db::{Database, SqlValue, Statement};
use crate::error::{ArchiveError, Result};
use crate::filter::{Filter, Predicate, SortField};
use crate::models::{MESSAGE_COLUMNS, Message};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sqlx::sqlite::SqliteConnection;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Persistent list of predicates. Deriving a query shares every existing
/// node with its parent and only allocates the new tail.
#[derive(Debug, Clone, Default)]
struct PredicateList {
    tail: Option<Arc<PredicateNode>>,
    len: usize,
}

#[derive(Debug)]
struct PredicateNode {
    predicate: Predicate,
    prev: Option<Arc<PredicateNode>>,
}

impl PredicateList {
    fn push(&self, predicate: Predicate) -> Self {
        Self {
            tail: Some(Arc::new(PredicateNode {
                predicate,
                prev: self.tail.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Predicates in the order they were added.
    fn in_order(&self) -> Vec<&Predicate> {
        let mut out = Vec::with_capacity(self.len);
        let mut node = self.tail.as_deref();
        while let Some(n) = node {
            out.push(&n.predicate);
            node = n.prev.as_deref();
        }
        out.reverse();
        out
    }
}

/// Immutable, chainable query over the archive's messages.
///
/// Every builder method returns a new `Query`; the receiver is never
/// changed. Unless a deletion filter says otherwise, soft-deleted messages
/// are excluded.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) db: Database,
    predicates: PredicateList,
    sort: Option<(SortField, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    include_deleted: bool,
}

impl Query {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            db,
            predicates: PredicateList::default(),
            sort: None,
            limit: None,
            offset: None,
            include_deleted: false,
        }
    }

    /// Adds one predicate per filter request, ANDed with the existing ones.
    ///
    /// Fails with [`ArchiveError::Validation`] on malformed values, in which
    /// case nothing is added.
    pub fn filter<I>(&self, filters: I) -> Result<Self>
    where
        I: IntoIterator<Item = Filter>,
    {
        let mut next = self.clone();
        for filter in filters {
            if filter.includes_deleted() {
                next.include_deleted = true;
            }
            if let Some(predicate) = filter.to_predicate()? {
                next.predicates = next.predicates.push(predicate);
            }
        }
        Ok(next)
    }

    pub(crate) fn and_predicate(&self, predicate: Predicate) -> Self {
        Self {
            predicates: self.predicates.push(predicate),
            ..self.clone()
        }
    }

    pub fn sort_by(&self, field: SortField, descending: bool) -> Self {
        Self {
            sort: Some((field, descending)),
            ..self.clone()
        }
    }

    pub fn limit(&self, n: u64) -> Self {
        Self {
            limit: Some(n),
            ..self.clone()
        }
    }

    pub fn offset(&self, n: u64) -> Self {
        Self {
            offset: Some(n),
            ..self.clone()
        }
    }

    pub fn is_writable(&self) -> bool {
        self.db.is_writable()
    }

    pub fn predicates(&self) -> Vec<&Predicate> {
        self.predicates.in_order()
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// ` WHERE a AND b ...` (or empty) and the parameters it binds.
    pub(crate) fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params = Vec::new();

        if !self.include_deleted {
            clauses.push("m.deleted_at IS NULL");
        }
        for p in self.predicates.in_order() {
            clauses.push(p.clause());
            params.extend_from_slice(p.params());
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }

    pub(crate) fn select_statement(&self, columns: &str) -> Statement {
        let (where_sql, params) = self.where_clause();
        let mut sql = format!("SELECT {columns} FROM messages m{where_sql}");

        match self.sort {
            Some((field, descending)) => {
                let direction = if descending { "DESC" } else { "ASC" };
                sql.push_str(&format!(" ORDER BY {} {direction}", field.sql()));
            }
            None => sql.push_str(" ORDER BY m.sent_at DESC"),
        }

        // SQLite only accepts OFFSET after a LIMIT; -1 means no cap.
        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", sql_int(limit))),
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", sql_int(offset)));
        }

        Statement::new(sql, params)
    }

    /// The SELECT this query runs when iterated.
    pub fn to_statement(&self) -> Statement {
        self.select_statement(MESSAGE_COLUMNS)
    }

    /// Lazy handle on the matching messages. Each call to
    /// [`MessageIter::stream`] runs the query again.
    pub fn iter(&self) -> MessageIter {
        MessageIter {
            db: self.db.clone(),
            statement: self.to_statement(),
        }
    }

    pub async fn fetch_all(&self) -> Result<Vec<Message>> {
        self.iter().fetch_all().await
    }

    /// Number of matches. Ignores sort and pagination.
    pub async fn count(&self) -> Result<i64> {
        let (where_sql, params) = self.where_clause();
        let stmt = Statement::new(format!("SELECT COUNT(*) FROM messages m{where_sql}"), params);
        debug!(sql = %stmt.sql, "count");
        sqlx::query_scalar_with::<_, i64, _>(&stmt.sql, stmt.arguments())
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| stmt.error(e))
    }

    pub async fn first(&self) -> Result<Option<Message>> {
        let stmt = self.limit(1).to_statement();
        debug!(sql = %stmt.sql, "first");
        sqlx::query_as_with::<_, Message, _>(&stmt.sql, stmt.arguments())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| stmt.error(e))
    }

    /// Whether anything matches, without loading rows. Ignores sort and
    /// pagination.
    pub async fn exists(&self) -> Result<bool> {
        let (where_sql, params) = self.where_clause();
        let stmt = Statement::new(
            format!("SELECT EXISTS (SELECT 1 FROM messages m{where_sql} LIMIT 1)"),
            params,
        );
        let found = sqlx::query_scalar_with::<_, i64, _>(&stmt.sql, stmt.arguments())
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| stmt.error(e))?;
        Ok(found != 0)
    }

    /// Ids of the matching messages, honouring sort and pagination.
    pub async fn ids(&self) -> Result<Vec<i64>> {
        let mut conn = self.db.acquire().await?;
        self.ids_in(&mut *conn).await
    }

    pub(crate) async fn ids_in(&self, conn: &mut SqliteConnection) -> Result<Vec<i64>> {
        self.select_statement("m.id").fetch_ids(conn).await
    }
}

/// Clamps to the signed 64-bit range SQLite integers have.
fn sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query(filters={}", self.predicates.len)?;
        if let Some((field, descending)) = self.sort {
            write!(f, ", sort={field}{}", if descending { "_desc" } else { "" })?;
        }
        if let Some(limit) = self.limit {
            write!(f, ", limit={limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, ", offset={offset}")?;
        }
        if self.include_deleted {
            f.write_str(", include_deleted")?;
        }
        f.write_str(")")
    }
}

/// A prepared message read. Holds no rows; streaming re-executes the SQL.
#[derive(Debug, Clone)]
pub struct MessageIter {
    db: Database,
    statement: Statement,
}

impl MessageIter {
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn stream(&self) -> BoxStream<'_, Result<Message>> {
        let sql = self.statement.sql.as_str();
        debug!(sql = %sql, "streaming messages");
        sqlx::query_as_with::<_, Message, _>(sql, self.statement.arguments())
            .fetch(self.db.pool())
            .map_err(move |e| ArchiveError::execution(sql, e))
            .boxed()
    }

    pub async fn fetch_all(&self) -> Result<Vec<Message>> {
        self.stream().try_collect().await
    }
}
