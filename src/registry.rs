//! Product-line registry.
//!
//! [`ProductLineRegistry`] is the in-process set of known product lines. It is built
//! once at startup (usually from [`ProductLineStore::load_registry`]), shared through
//! an `Arc`, and consulted before any partition is touched. [`ProductLineStore`]
//! persists the set in the `product_lines` table.

use crate::executor::{StoreError, StoreExecutor};
use crate::partition::PRODUCT_LINE_PATTERN;
use crate::predicate::{Statement, COUNT_ALIAS};
use crate::schema::ColumnName;
use crate::transaction::Transaction;
use crate::value::FieldValue;
use log::info;
use sea_query::{Expr, ExprTrait, Iden, Order, PostgresQueryBuilder, Query};
use std::sync::{PoisonError, RwLock};

/// Registered product lines, in registration order
#[derive(Debug, Default)]
pub struct ProductLineRegistry {
    lines: RwLock<Vec<String>>,
}

fn check_identifier(product_line: &str) -> Result<(), StoreError> {
    if !PRODUCT_LINE_PATTERN.is_match(product_line) {
        return Err(StoreError::InvalidInput(format!(
            "product line '{product_line}' must be 1-32 characters of [A-Za-z0-9]"
        )));
    }
    Ok(())
}

impl ProductLineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from known identifiers, dropping duplicates.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` if any identifier is malformed.
    pub fn with_lines<I, S>(lines: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        registry.replace(lines)?;
        Ok(registry)
    }

    /// Exact, case-sensitive membership test.
    pub fn is_valid(&self, product_line: &str) -> bool {
        self.read().iter().any(|l| l == product_line)
    }

    pub fn names(&self) -> Vec<String> {
        self.read().clone()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Register a new product line.
    ///
    /// # Errors
    ///
    /// `StoreError::InvalidInput` for a malformed identifier, `StoreError::Conflict`
    /// if it is already registered.
    pub fn add(&self, product_line: &str) -> Result<(), StoreError> {
        let product_line = product_line.trim();
        check_identifier(product_line)?;
        let mut lines = self.write();
        if lines.iter().any(|l| l == product_line) {
            return Err(StoreError::Conflict(format!(
                "product line '{product_line}' already exists"
            )));
        }
        lines.push(product_line.to_string());
        Ok(())
    }

    /// Seed `defaults` when nothing is registered yet. Returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` if a default is malformed; nothing is
    /// seeded in that case.
    pub fn seed_defaults_if_empty<S: AsRef<str>>(&self, defaults: &[S]) -> Result<usize, StoreError> {
        let mut lines = self.write();
        if !lines.is_empty() {
            return Ok(0);
        }
        let mut seeded: Vec<String> = Vec::with_capacity(defaults.len());
        for line in defaults {
            let line = line.as_ref().trim();
            check_identifier(line)?;
            if !seeded.iter().any(|l| l == line) {
                seeded.push(line.to_string());
            }
        }
        *lines = seeded;
        Ok(lines.len())
    }

    /// Swap in a freshly loaded set (reload).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` if any identifier is malformed; the current
    /// set is kept in that case.
    pub fn replace<I, S>(&self, lines: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fresh: Vec<String> = Vec::new();
        for line in lines {
            let line: String = line.into();
            check_identifier(&line)?;
            if !fresh.contains(&line) {
                fresh.push(line);
            }
        }
        *self.write() = fresh;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<String>> {
        self.lines.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<String>> {
        self.lines.write().unwrap_or_else(PoisonError::into_inner)
    }
}

enum ProductLines {
    Table,
    Id,
    ProductLine,
}

impl Iden for ProductLines {
    fn unquoted(&self) -> &str {
        match self {
            Self::Table => "product_lines",
            Self::Id => "id",
            Self::ProductLine => "product_line",
        }
    }
}

/// Persistence of the registry in `product_lines`
pub struct ProductLineStore<'e, E: StoreExecutor + ?Sized> {
    executor: &'e E,
}

impl<'e, E: StoreExecutor + ?Sized> ProductLineStore<'e, E> {
    pub fn new(executor: &'e E) -> Self {
        Self { executor }
    }

    /// Registered identifiers ordered by id.
    pub fn load(&self) -> Result<Vec<String>, StoreError> {
        let query = Query::select()
            .column(ProductLines::ProductLine)
            .from(ProductLines::Table)
            .order_by(ProductLines::Id, Order::Asc)
            .to_owned();
        let rows = Statement::new(query.build(PostgresQueryBuilder)).query(self.executor)?;
        rows.iter()
            .map(|row| match row.get("product_line") {
                Some(FieldValue::Text(name)) => Ok(name.clone()),
                other => Err(StoreError::ParseError(format!(
                    "unexpected product_line value {other:?}"
                ))),
            })
            .collect()
    }

    pub fn load_registry(&self) -> Result<ProductLineRegistry, StoreError> {
        ProductLineRegistry::with_lines(self.load()?)
    }

    pub fn exists(&self, product_line: &str) -> Result<bool, StoreError> {
        let query = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), ColumnName(COUNT_ALIAS))
            .from(ProductLines::Table)
            .and_where(Expr::col(ProductLines::ProductLine).eq(product_line.trim().to_string()))
            .to_owned();
        Ok(Statement::new(query.build(PostgresQueryBuilder)).count(self.executor)? > 0)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let query = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), ColumnName(COUNT_ALIAS))
            .from(ProductLines::Table)
            .to_owned();
        Statement::new(query.build(PostgresQueryBuilder)).count(self.executor)
    }

    /// Insert one identifier. A duplicate surfaces as the backend's unique violation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` for a malformed identifier before any I/O.
    pub fn insert(&self, product_line: &str) -> Result<u64, StoreError> {
        let product_line = product_line.trim();
        check_identifier(product_line)?;
        let query = Query::insert()
            .into_table(ProductLines::Table)
            .columns([ProductLines::ProductLine])
            .values([product_line.to_string().into()])
            .map_err(|e| StoreError::QueryError(e.to_string()))?
            .to_owned();
        let rows = Statement::new(query.build(PostgresQueryBuilder)).execute(self.executor)?;
        info!("Registered product line {product_line}");
        Ok(rows)
    }

    /// Seed `defaults` when the table is empty, in one transaction.
    ///
    /// Returns the identifiers that were inserted (empty when the table already had
    /// rows).
    pub fn initialize_defaults<S: AsRef<str>>(
        &self,
        defaults: &[S],
    ) -> Result<Vec<String>, StoreError> {
        for line in defaults {
            check_identifier(line.as_ref().trim())?;
        }
        let tx = Transaction::begin(self.executor)?;
        let store = ProductLineStore::new(&tx);
        if store.count()? > 0 {
            tx.commit()?;
            return Ok(Vec::new());
        }
        let mut seeded = Vec::with_capacity(defaults.len());
        for line in defaults {
            store.insert(line.as_ref())?;
            seeded.push(line.as_ref().trim().to_string());
        }
        tx.commit()?;
        info!("Initialized default product lines: {}", seeded.join(", "));
        Ok(seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockExecutor;
    use crate::value::FieldMap;
    use std::sync::Arc;

    #[test]
    fn test_membership_is_exact() {
        let registry = ProductLineRegistry::with_lines(["VGA", "MB"]).unwrap();
        assert!(registry.is_valid("VGA"));
        assert!(!registry.is_valid("vga"));
        assert!(!registry.is_valid(""));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_shapes() {
        let registry = ProductLineRegistry::new();
        registry.add("NB").unwrap();
        assert!(matches!(registry.add("NB"), Err(StoreError::Conflict(_))));
        assert!(registry.add("NB-2").unwrap_err().is_invalid_input());
        assert!(registry.add(&"X".repeat(33)).unwrap_err().is_invalid_input());
        assert_eq!(registry.names(), vec!["NB"]);
    }

    #[test]
    fn test_seed_only_when_empty() {
        let registry = ProductLineRegistry::new();
        assert_eq!(registry.seed_defaults_if_empty(&["VGA", "MB", "MiniPC"]).unwrap(), 3);
        assert_eq!(registry.seed_defaults_if_empty(&["Other"]).unwrap(), 0);
        assert_eq!(registry.names(), vec!["VGA", "MB", "MiniPC"]);
    }

    #[test]
    fn test_replace_keeps_old_set_on_error() {
        let registry = ProductLineRegistry::with_lines(["VGA"]).unwrap();
        assert!(registry.replace(["MB", "bad name"]).is_err());
        assert_eq!(registry.names(), vec!["VGA"]);
        registry.replace(["MB", "MB", "NB"]).unwrap();
        assert_eq!(registry.names(), vec!["MB", "NB"]);
    }

    #[test]
    fn test_registry_is_shareable_across_threads() {
        let registry = Arc::new(ProductLineRegistry::with_lines(["VGA"]).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.add(&format!("L{i}")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(registry.count(), 5);
    }

    #[test]
    fn test_load_orders_by_id() {
        let mock = MockExecutor::new();
        mock.push_rows(vec![
            FieldMap::new().with("product_line", "VGA"),
            FieldMap::new().with("product_line", "MB"),
        ]);
        let registry = ProductLineStore::new(&mock).load_registry().unwrap();
        assert_eq!(registry.names(), vec!["VGA", "MB"]);
        assert_eq!(
            mock.statements()[0],
            r#"SELECT "product_line" FROM "product_lines" ORDER BY "id" ASC"#
        );
    }

    #[test]
    fn test_initialize_defaults_on_empty_table() {
        let mock = MockExecutor::new();
        mock.push_count(0).push_affected(1).push_affected(1).push_affected(1);
        let seeded = ProductLineStore::new(&mock)
            .initialize_defaults(&["VGA", "MB", "MiniPC"])
            .unwrap();
        assert_eq!(seeded, vec!["VGA", "MB", "MiniPC"]);
        let inserts: Vec<_> = mock
            .calls()
            .into_iter()
            .filter(|c| c.sql.starts_with("INSERT"))
            .collect();
        assert_eq!(inserts.len(), 3);
        assert_eq!(inserts[2].params, vec!["Some(\"MiniPC\")".to_string()]);
        assert_eq!(mock.statements().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn test_initialize_defaults_skips_populated_table() {
        let mock = MockExecutor::new();
        mock.push_count(2);
        let seeded = ProductLineStore::new(&mock)
            .initialize_defaults(&["VGA"])
            .unwrap();
        assert!(seeded.is_empty());
        assert!(!mock.statements().iter().any(|s| s.starts_with("INSERT")));
    }

    #[test]
    fn test_insert_failure_rolls_back_seeding() {
        let mock = MockExecutor::new();
        mock.push_count(0).push_affected(1).push_error("unique violation");
        assert!(ProductLineStore::new(&mock)
            .initialize_defaults(&["VGA", "MB"])
            .is_err());
        assert_eq!(mock.statements().last().map(String::as_str), Some("ROLLBACK"));
    }
}
