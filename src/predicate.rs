//! Dynamic Predicate / Update Builder.
//!
//! Turns sparse [`FieldMap`]s into parameterized statements with sea-query. Names
//! are checked against the entity's closed catalog ([`EntitySchema`]) before any SQL
//! is produced; values are always bound as `$n` parameters, in the same order their
//! clauses were appended.

use crate::executor::{StoreError, StoreExecutor};
use crate::partition::PartitionName;
use crate::schema::{ColumnDef, ColumnKind, ColumnName, EntitySchema, MatchOp, SortOrder};
use crate::value::{FieldMap, FieldValue};
use crate::value_conversion::with_converted_params;
use chrono::NaiveDate;
use sea_query::{
    Asterisk, Condition, Expr, ExprTrait, LikeExpr, Order, PostgresQueryBuilder, Query, Value,
    Values,
};

/// Alias of every `COUNT(*)` column this module emits
pub const COUNT_ALIAS: &str = "count";
/// Alias of the per-product count in [`grouped_count`]
pub const GROUP_COUNT_ALIAS: &str = "stock_count";

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Values,
}

impl Statement {
    pub(crate) fn new((sql, values): (String, Values)) -> Self {
        Self { sql, values }
    }

    /// Run as a data-modifying statement and return the affected row count.
    ///
    /// # Errors
    ///
    /// Propagates executor and parameter conversion errors.
    pub fn execute<E: StoreExecutor + ?Sized>(&self, executor: &E) -> Result<u64, StoreError> {
        with_converted_params(&self.values, |params| executor.execute(&self.sql, params))
    }

    /// Run as a query and return every row.
    ///
    /// # Errors
    ///
    /// Propagates executor and parameter conversion errors.
    pub fn query<E: StoreExecutor + ?Sized>(
        &self,
        executor: &E,
    ) -> Result<Vec<FieldMap>, StoreError> {
        with_converted_params(&self.values, |params| {
            executor.query_records(&self.sql, params)
        })
    }

    /// Run a `COUNT(*)` statement built by this module.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ParseError` if the count column is missing or not an integer.
    pub fn count<E: StoreExecutor + ?Sized>(&self, executor: &E) -> Result<i64, StoreError> {
        let row = self.query(executor)?.into_iter().next();
        match row.as_ref().and_then(|r| r.get(COUNT_ALIAS)) {
            Some(FieldValue::Int(n)) => Ok(*n),
            Some(other) => Err(StoreError::ParseError(format!(
                "count column holds non-integer value {other}"
            ))),
            None => Ok(0),
        }
    }
}

/// Escape LIKE metacharacters so caller text matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn contains_pattern(raw: &str) -> String {
    format!("%{}%", escape_like(raw))
}

/// Coerce a field value into the bound value for `column`.
fn bind_value(column: &ColumnDef, value: &FieldValue, trim: bool) -> Result<Value, StoreError> {
    match (column.kind, value) {
        (ColumnKind::Date, FieldValue::Date(d)) => Ok(Value::from(*d)),
        (ColumnKind::Date, FieldValue::Timestamp(ts)) => Ok(Value::from(ts.date())),
        (ColumnKind::Date, FieldValue::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Value::from)
            .map_err(|e| {
                StoreError::InvalidInput(format!(
                    "{} expects a YYYY-MM-DD date, got '{s}': {e}",
                    column.name.0
                ))
            }),
        (ColumnKind::Date, FieldValue::Int(i)) => Err(StoreError::InvalidInput(format!(
            "{} expects a date, got integer {i}",
            column.name.0
        ))),
        (ColumnKind::Text, FieldValue::Text(s)) if trim => Ok(Value::from(s.trim().to_string())),
        (ColumnKind::Text, other) => Ok(Value::from(other.to_string())),
    }
}

fn order(sort: SortOrder) -> Order {
    match sort {
        SortOrder::Asc => Order::Asc,
        SortOrder::Desc => Order::Desc,
    }
}

/// Build the conjunctive filter for sparse search criteria.
///
/// Keys are search keys (`serialNo`, `customerName`, `startDate`, ...), not column
/// names. Absent and blank values are skipped; unknown keys are rejected. Clauses
/// are appended in catalog order.
///
/// # Errors
///
/// Returns `StoreError::InvalidInput` for unknown keys or malformed dates.
pub fn filter_condition<S: EntitySchema>(criteria: &FieldMap) -> Result<Condition, StoreError> {
    if let Some(unknown) = criteria.keys().find(|k| S::search_key(k).is_none()) {
        return Err(StoreError::InvalidInput(format!(
            "unknown {} search key '{unknown}'",
            S::LABEL
        )));
    }

    let mut condition = Condition::all();
    for key in S::search_keys() {
        let Some(value) = criteria.get(key.key).filter(|v| !v.is_blank()) else {
            continue;
        };
        let column = Expr::col(key.column.name);
        let expr = match key.op {
            MatchOp::Equals => column.eq(bind_value(&key.column, value, true)?),
            MatchOp::Contains => {
                let raw = value.to_string();
                column.like(LikeExpr::new(contains_pattern(raw.trim())))
            }
            MatchOp::AtLeast => column.gte(bind_value(&key.column, value, true)?),
            MatchOp::AtMost => column.lte(bind_value(&key.column, value, true)?),
        };
        condition = condition.add(expr);
    }
    Ok(condition)
}

/// Column assignments for a write: `(column, value)` pairs in input order.
///
/// The identity column is dropped even if present; absent and blank values are
/// skipped.
///
/// # Errors
///
/// Returns `StoreError::InvalidInput` for unknown columns or malformed dates.
pub fn assignments<S: EntitySchema>(
    fields: &FieldMap,
) -> Result<Vec<(ColumnName, Value)>, StoreError> {
    let mut out = Vec::new();
    for (name, value) in fields.iter() {
        let column = S::column(name).ok_or_else(|| {
            StoreError::InvalidInput(format!("unknown {} column '{name}'", S::LABEL))
        })?;
        if column.name == S::identity() {
            continue;
        }
        match value {
            Some(v) if !v.is_blank() => out.push((column.name, bind_value(column, v, false)?)),
            _ => {}
        }
    }
    Ok(out)
}

/// `SELECT *` with the sparse filter and the entity's default ordering.
///
/// # Errors
///
/// See [`filter_condition`].
pub fn select<S: EntitySchema>(
    partition: &PartitionName,
    criteria: &FieldMap,
) -> Result<Statement, StoreError> {
    let (order_col, sort) = S::default_order();
    let query = Query::select()
        .column(Asterisk)
        .from(partition.clone())
        .cond_where(filter_condition::<S>(criteria)?)
        .order_by(order_col, order(sort))
        .to_owned();
    Ok(Statement::new(query.build(PostgresQueryBuilder)))
}

/// `SELECT *` with a raw condition and the default ordering.
fn select_where<S: EntitySchema>(partition: &PartitionName, condition: Condition) -> Statement {
    let (order_col, sort) = S::default_order();
    let query = Query::select()
        .column(Asterisk)
        .from(partition.clone())
        .cond_where(condition)
        .order_by(order_col, order(sort))
        .to_owned();
    Statement::new(query.build(PostgresQueryBuilder))
}

pub fn select_by_identity<S: EntitySchema>(partition: &PartitionName, identity: &str) -> Statement {
    select_where::<S>(
        partition,
        Condition::all().add(Expr::col(S::identity()).eq(identity.to_string())),
    )
}

/// Rows where any keyword column contains `keyword`.
pub fn keyword<S: EntitySchema>(partition: &PartitionName, keyword: &str) -> Statement {
    let pattern = contains_pattern(keyword.trim());
    let mut any = Condition::any();
    for column in S::keyword_columns() {
        any = any.add(Expr::col(*column).like(LikeExpr::new(pattern.clone())));
    }
    select_where::<S>(partition, any)
}

/// Rows whose `column` is null or empty (`missing = true`), or set (`missing = false`).
pub fn select_by_presence<S: EntitySchema>(
    partition: &PartitionName,
    column: ColumnName,
    missing: bool,
) -> Statement {
    let condition = if missing {
        Condition::any()
            .add(Expr::col(column).is_null())
            .add(Expr::col(column).eq(""))
    } else {
        Condition::all()
            .add(Expr::col(column).is_not_null())
            .add(Expr::col(column).ne(""))
    };
    select_where::<S>(partition, condition)
}

/// `SELECT COUNT(*)`, optionally restricted to `column = value`.
pub fn count(partition: &PartitionName, filter: Option<(ColumnName, &str)>) -> Statement {
    let mut query = Query::select();
    query
        .expr_as(Expr::cust("COUNT(*)"), ColumnName(COUNT_ALIAS))
        .from(partition.clone());
    if let Some((column, value)) = filter {
        query.and_where(Expr::col(column).eq(value.to_string()));
    }
    Statement::new(query.build(PostgresQueryBuilder))
}

/// Row count per distinct `column` value, largest group first.
pub fn grouped_count(partition: &PartitionName, column: ColumnName) -> Statement {
    let query = Query::select()
        .column(column)
        .expr_as(Expr::cust("COUNT(*)"), ColumnName(GROUP_COUNT_ALIAS))
        .from(partition.clone())
        .group_by_col(column)
        .order_by(ColumnName(GROUP_COUNT_ALIAS), Order::Desc)
        .to_owned();
    Statement::new(query.build(PostgresQueryBuilder))
}

/// `INSERT` of every supplied field, identity included and required.
///
/// # Errors
///
/// Returns `StoreError::InvalidInput` if the identity is missing or blank, or for
/// unknown columns and malformed dates.
pub fn insert<S: EntitySchema>(
    partition: &PartitionName,
    fields: &FieldMap,
) -> Result<Statement, StoreError> {
    let identity = S::identity();
    let serial = fields
        .get(identity.0)
        .filter(|v| !v.is_blank())
        .ok_or_else(|| StoreError::InvalidInput(format!("{} is required", identity.0)))?;

    let mut columns = vec![identity];
    let mut values = vec![Value::from(serial.to_string().trim().to_string())];
    for (column, value) in assignments::<S>(fields)? {
        columns.push(column);
        values.push(value);
    }

    let query = Query::insert()
        .into_table(partition.clone())
        .columns(columns)
        .values(values.into_iter().map(Into::into))
        .map_err(|e| StoreError::QueryError(e.to_string()))?
        .to_owned();
    Ok(Statement::new(query.build(PostgresQueryBuilder)))
}

/// `UPDATE ... SET <assignments> WHERE identity = $n`.
///
/// Returns `Ok(None)` when nothing would be assigned.
///
/// # Errors
///
/// See [`assignments`].
pub fn update<S: EntitySchema>(
    partition: &PartitionName,
    identity: &str,
    fields: &FieldMap,
) -> Result<Option<Statement>, StoreError> {
    let assignments = assignments::<S>(fields)?;
    if assignments.is_empty() {
        return Ok(None);
    }

    let mut query = Query::update();
    query.table(partition.clone());
    for (column, value) in assignments {
        query.value(column, value);
    }
    query.and_where(Expr::col(S::identity()).eq(identity.to_string()));
    Ok(Some(Statement::new(query.build(PostgresQueryBuilder))))
}

pub fn delete<S: EntitySchema>(partition: &PartitionName, identity: &str) -> Statement {
    let query = Query::delete()
        .from_table(partition.clone())
        .and_where(Expr::col(S::identity()).eq(identity.to_string()))
        .to_owned();
    Statement::new(query.build(PostgresQueryBuilder))
}
