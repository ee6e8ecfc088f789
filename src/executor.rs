//! Statement execution over `may_postgres`.
//!
//! [`StoreExecutor`] is the seam every store, the transaction guard and the registry
//! persistence run through. [`PgExecutor`] is the production implementation over a single
//! `may_postgres::Client`; tests use the scripted executor in `test_helpers`.

use crate::value::{FieldMap, FieldValue};
use chrono::{NaiveDate, NaiveDateTime};
use may_postgres::types::{ToSql, Type};
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Error type for everything below the service layer
#[derive(Debug)]
pub enum StoreError {
    /// Blank or structurally invalid input, rejected before any I/O
    InvalidInput(String),
    /// Identity already present on insert
    Conflict(String),
    /// Identity absent where the operation requires it
    NotFound(String),
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Backend failure reported by a non-postgres executor
    Storage(String),
    /// Statement could not be built
    QueryError(String),
    /// Row decoding/conversion error
    ParseError(String),
    /// Multi-statement unit failed and was rolled back
    Transaction(String),
    /// Connection could not be established
    Connection(String),
}

impl StoreError {
    /// Whether this error describes caller input rather than a storage failure.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, StoreError::InvalidInput(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidInput(s) => write!(f, "Invalid input: {s}"),
            StoreError::Conflict(s) => write!(f, "Conflict: {s}"),
            StoreError::NotFound(s) => write!(f, "Not found: {s}"),
            StoreError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            StoreError::Storage(s) => write!(f, "Storage error: {s}"),
            StoreError::QueryError(s) => write!(f, "Query error: {s}"),
            StoreError::ParseError(s) => write!(f, "Parse error: {s}"),
            StoreError::Transaction(s) => write!(f, "Transaction error: {s}"),
            StoreError::Connection(s) => write!(f, "Connection error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        StoreError::PostgresError(err)
    }
}

/// Trait for executing statements against partition tables
///
/// Rows come back already decoded into [`FieldMap`]s, so callers never touch driver
/// row types and alternative executors (transactions, test doubles) only have to
/// produce field maps.
pub trait StoreExecutor {
    /// Execute a statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError>;

    /// Execute a query and return every row as a field map
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or a column cannot be decoded.
    fn query_records(&self, query: &str, params: &[&dyn ToSql])
        -> Result<Vec<FieldMap>, StoreError>;

    /// Execute a query and return the first row, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn query_first(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<FieldMap>, StoreError> {
        Ok(self.query_records(query, params)?.into_iter().next())
    }
}

impl<T: StoreExecutor + ?Sized> StoreExecutor for &T {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        (**self).execute(query, params)
    }

    fn query_records(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<FieldMap>, StoreError> {
        (**self).query_records(query, params)
    }
}

impl<T: StoreExecutor + ?Sized> StoreExecutor for Box<T> {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        (**self).execute(query, params)
    }

    fn query_records(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<FieldMap>, StoreError> {
        (**self).query_records(query, params)
    }
}

/// `StoreExecutor` over one `may_postgres::Client` connection.
///
/// A transaction started on this executor (see [`crate::transaction::Transaction`])
/// owns the connection until it is closed, so concurrent units of work should each
/// use their own executor.
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with [`crate::connection::connect`] and wrap the client.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the connection string is invalid or the
    /// server cannot be reached.
    pub fn connect(connection_string: &str) -> Result<Self, StoreError> {
        crate::connection::connect(connection_string)
            .map(Self::new)
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    /// Check that the connection still answers `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the probe itself fails.
    pub fn check_health(&self) -> Result<bool, StoreError> {
        let rows = self.client.query("SELECT 1", &[])?;
        Ok(rows.len() == 1)
    }

    fn timed<T>(
        &self,
        query: &str,
        run: impl FnOnce(&Client) -> Result<T, PostgresError>,
    ) -> Result<T, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(query).entered();

        log::debug!("executing: {query}");
        let start = Instant::now();
        let result = run(&self.client).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_query_error();
            StoreError::PostgresError(e)
        });

        let duration = start.elapsed();
        #[cfg(feature = "metrics")]
        METRICS.record_query_duration(duration);
        #[cfg(not(feature = "metrics"))]
        let _ = duration;

        result
    }
}

impl StoreExecutor for PgExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        self.timed(query, |client| client.execute(query, params))
    }

    fn query_records(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<FieldMap>, StoreError> {
        let rows = self.timed(query, |client| client.query(query, params))?;
        rows.iter().map(row_to_field_map).collect()
    }
}

/// Decode every column of a row into a [`FieldMap`], keeping column order.
///
/// # Errors
///
/// Returns `StoreError::PostgresError` if a value cannot be read as its declared type.
pub fn row_to_field_map(row: &Row) -> Result<FieldMap, StoreError> {
    let mut map = FieldMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_())?;
        map.insert(column.name(), value);
    }
    Ok(map)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<Option<FieldValue>, StoreError> {
    let value = if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)?.map(FieldValue::Date)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(FieldValue::Timestamp)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(FieldValue::Int)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| FieldValue::Int(i64::from(v)))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| FieldValue::Int(i64::from(v)))
    } else if *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(idx)?.map(FieldValue::Text)
    } else {
        return Err(StoreError::ParseError(format!(
            "unsupported column type {ty} at index {idx}"
        )));
    };
    Ok(value)
}
