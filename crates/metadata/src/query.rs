//! Table-scoped query building for shard connections.
//!
//! A [`ScopedQuery`] may only reference the file-cache tables. Referencing any
//! other table fails with [`MetadataError::DisallowedTable`] before SQL is sent.
//! Aliases and column names must be plain identifiers (optionally qualified by
//! an alias) and join conditions must equate two such columns; anything else
//! fails with [`MetadataError::InvalidIdentifier`].

use crate::error::{MetadataError, MetadataResult};
use crate::shard::ShardConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite};

/// File cache table.
pub const TABLE_FILECACHE: &str = "filecache";
/// Extended file attributes table.
pub const TABLE_FILECACHE_EXTENDED: &str = "filecache_extended";
/// Per-file JSON metadata table.
pub const TABLE_FILES_METADATA: &str = "files_metadata";

/// Tables a shard query may touch.
pub const ALLOWED_TABLES: [&str; 3] = [
    TABLE_FILECACHE,
    TABLE_FILECACHE_EXTENDED,
    TABLE_FILES_METADATA,
];

/// Columns selected for a file cache entry (`f` = filecache, `fe` = extended).
const FILE_CACHE_COLUMNS: [&str; 17] = [
    "f.fileid",
    "f.storage",
    "f.path",
    "f.path_hash",
    "f.parent",
    "f.name",
    "f.mimetype",
    "f.size",
    "f.mtime",
    "f.storage_mtime",
    "f.encrypted",
    "f.etag",
    "f.permissions",
    "f.checksum",
    "fe.metadata_etag",
    "fe.creation_time",
    "fe.upload_time",
];

/// Server-side current unix time.
const NOW_EXPRESSION: &str = "CAST(strftime('%s', 'now') AS INTEGER)";

/// A typed value written by `insert` or `update`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    /// The shard's current time, evaluated by the database.
    Now,
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `column` or `alias.column`.
fn is_column_ref(s: &str) -> bool {
    match s.split_once('.') {
        Some((qualifier, column)) => is_identifier(qualifier) && is_identifier(column),
        None => is_identifier(s),
    }
}

fn invalid_identifier(conn: &ShardConnection, fragment: &str) -> MetadataError {
    tracing::error!(
        shard = %conn.shard(),
        fragment = fragment,
        "Query contained a fragment that is not a plain identifier"
    );
    MetadataError::InvalidIdentifier(fragment.to_string())
}

/// Query builder bound to one shard and restricted to [`ALLOWED_TABLES`].
pub struct ScopedQuery<'c> {
    conn: &'c ShardConnection,
    builder: QueryBuilder<'static, Sqlite>,
    has_where: bool,
    /// First invalid predicate column; reported when the query runs.
    invalid: Option<MetadataError>,
}

impl<'c> ScopedQuery<'c> {
    pub(crate) fn new(conn: &'c ShardConnection) -> Self {
        Self {
            conn,
            builder: QueryBuilder::new(""),
            has_where: false,
            invalid: None,
        }
    }

    fn check_table(&self, table: &str) -> MetadataResult<()> {
        if ALLOWED_TABLES.contains(&table) {
            return Ok(());
        }
        tracing::error!(
            shard = %self.conn.shard(),
            table = table,
            "Query referenced a table outside the file cache allow-list"
        );
        Err(MetadataError::DisallowedTable {
            table: table.to_string(),
        })
    }

    fn check_alias(&self, alias: &str) -> MetadataResult<()> {
        if is_identifier(alias) {
            Ok(())
        } else {
            Err(invalid_identifier(self.conn, alias))
        }
    }

    fn check_column(&self, column: &str) -> MetadataResult<()> {
        if is_column_ref(column) {
            Ok(())
        } else {
            Err(invalid_identifier(self.conn, column))
        }
    }

    /// Predicates keep the builder chain infallible; a bad column is held
    /// back and returned by the terminal call instead.
    fn defer_column_check(&mut self, column: &str) {
        if self.invalid.is_none() {
            self.invalid = self.check_column(column).err();
        }
    }

    fn take_invalid(&mut self) -> MetadataResult<()> {
        match self.invalid.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// `SELECT columns FROM table alias`.
    pub fn select(mut self, table: &str, alias: &str, columns: &[&str]) -> MetadataResult<Self> {
        self.check_table(table)?;
        self.check_alias(alias)?;
        for column in columns {
            if *column != "*" {
                self.check_column(column)?;
            }
        }
        self.builder.push("SELECT ");
        self.builder.push(columns.join(", "));
        self.builder.push(format!(" FROM {table} {alias}"));
        Ok(self)
    }

    /// Select file cache entries, joined with their extended attributes.
    ///
    /// The file cache table is aliased `f`.
    pub fn select_file_cache(self) -> MetadataResult<Self> {
        self.select(TABLE_FILECACHE, "f", &FILE_CACHE_COLUMNS)?
            .left_join(TABLE_FILECACHE_EXTENDED, "fe", "f.fileid = fe.fileid")
    }

    /// `LEFT JOIN table alias ON left = right`, both sides being columns.
    pub fn left_join(mut self, table: &str, alias: &str, on: &str) -> MetadataResult<Self> {
        self.check_table(table)?;
        self.check_alias(alias)?;
        let on = match on.split_once('=') {
            Some((left, right)) if is_column_ref(left.trim()) && is_column_ref(right.trim()) => {
                format!("{} = {}", left.trim(), right.trim())
            }
            _ => return Err(invalid_identifier(self.conn, on)),
        };
        self.builder
            .push(format!(" LEFT JOIN {table} {alias} ON {on}"));
        Ok(self)
    }

    /// `INSERT INTO table (columns) VALUES (values)`.
    pub fn insert(mut self, table: &str, values: Vec<(&str, SqlValue)>) -> MetadataResult<Self> {
        self.check_table(table)?;
        let columns: Vec<&str> = values.iter().map(|(column, _)| *column).collect();
        for column in &columns {
            self.check_column(column)?;
        }
        self.builder
            .push(format!("INSERT INTO {table} ({}) VALUES (", columns.join(", ")));
        for (i, (_, value)) in values.into_iter().enumerate() {
            if i > 0 {
                self.builder.push(", ");
            }
            self.push_value(value);
        }
        self.builder.push(")");
        Ok(self)
    }

    /// `UPDATE table SET column = value, ...`.
    pub fn update(mut self, table: &str, values: Vec<(&str, SqlValue)>) -> MetadataResult<Self> {
        self.check_table(table)?;
        for (column, _) in &values {
            self.check_column(column)?;
        }
        self.builder.push(format!("UPDATE {table} SET "));
        for (i, (column, value)) in values.into_iter().enumerate() {
            if i > 0 {
                self.builder.push(", ");
            }
            self.builder.push(format!("{column} = "));
            self.push_value(value);
        }
        Ok(self)
    }

    /// `DELETE FROM table`.
    pub fn delete_from(mut self, table: &str) -> MetadataResult<Self> {
        self.check_table(table)?;
        self.builder.push(format!("DELETE FROM {table}"));
        Ok(self)
    }

    fn push_value(&mut self, value: SqlValue) {
        match value {
            SqlValue::Int(v) => {
                self.builder.push_bind(v);
            }
            SqlValue::Text(v) => {
                self.builder.push_bind(v);
            }
            SqlValue::Now => {
                self.builder.push(NOW_EXPRESSION);
            }
        }
    }

    fn push_condition_prefix(&mut self) {
        if self.has_where {
            self.builder.push(" AND ");
        } else {
            self.builder.push(" WHERE ");
            self.has_where = true;
        }
    }

    /// `AND column = value` with an integer bind.
    pub fn where_int_eq(mut self, column: &str, value: i64) -> Self {
        self.defer_column_check(column);
        self.push_condition_prefix();
        self.builder.push(format!("{column} = "));
        self.builder.push_bind(value);
        self
    }

    /// `AND column IN (values)` with integer binds. An empty set matches nothing.
    pub fn where_int_in(mut self, column: &str, values: &[i64]) -> Self {
        self.defer_column_check(column);
        self.push_condition_prefix();
        if values.is_empty() {
            self.builder.push("0 = 1");
            return self;
        }
        self.builder.push(format!("{column} IN ("));
        let mut separated = self.builder.separated(", ");
        for value in values {
            separated.push_bind(*value);
        }
        separated.push_unseparated(")");
        self
    }

    /// `AND column = value` with a text bind.
    pub fn where_str_eq(mut self, column: &str, value: &str) -> Self {
        self.defer_column_check(column);
        self.push_condition_prefix();
        self.builder.push(format!("{column} = "));
        self.builder.push_bind(value.to_string());
        self
    }

    /// The SQL built so far, with `?` placeholders.
    pub fn sql(&self) -> &str {
        self.builder.sql()
    }

    /// Fetch all rows, decoded as `T`.
    pub async fn fetch_all<T>(mut self) -> MetadataResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.take_invalid()?;
        let query = self.builder.build_query_as::<T>();
        let mut tx = self.conn.lock_transaction().await;
        self.conn.record_query();
        let rows = match tx.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(self.conn.pool()).await?,
        };
        Ok(rows)
    }

    /// Fetch at most one row, decoded as `T`.
    pub async fn fetch_optional<T>(mut self) -> MetadataResult<Option<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.take_invalid()?;
        let query = self.builder.build_query_as::<T>();
        let mut tx = self.conn.lock_transaction().await;
        self.conn.record_query();
        let row = match tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(self.conn.pool()).await?,
        };
        Ok(row)
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(mut self) -> MetadataResult<u64> {
        self.take_invalid()?;
        let query = self.builder.build();
        let mut tx = self.conn.lock_transaction().await;
        self.conn.record_query();
        let result = match tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(self.conn.pool()).await?,
        };
        Ok(result.rows_affected())
    }
}
