//! Stock-only store operations.

use super::StockStore;
use crate::executor::{StoreError, StoreExecutor};
use crate::predicate::{self, GROUP_COUNT_ALIAS};
use crate::schema::STOCK_PRODUCT_NAME;
use crate::value::{FieldMap, FieldValue};
use serde::Serialize;

/// One row of the grouped stock count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductCount {
    /// `None` for stock without a product name
    pub product_name: Option<String>,
    pub stock_count: i64,
}

impl<'e, E: StoreExecutor + ?Sized> StockStore<'e, E> {
    /// Every stock record, ordered by serial number.
    pub fn list_all(&self) -> Result<Vec<FieldMap>, StoreError> {
        self.search(&FieldMap::new())
    }

    /// Stock count per product name, largest first.
    pub fn count_by_product_name(&self) -> Result<Vec<ProductCount>, StoreError> {
        let rows = predicate::grouped_count(self.partition(), STOCK_PRODUCT_NAME)
            .query(self.executor())?;
        rows.iter().map(product_count).collect()
    }
}

fn product_count(row: &FieldMap) -> Result<ProductCount, StoreError> {
    let stock_count = match row.get(GROUP_COUNT_ALIAS) {
        Some(FieldValue::Int(n)) => *n,
        other => {
            return Err(StoreError::ParseError(format!(
                "expected integer {GROUP_COUNT_ALIAS}, got {other:?}"
            )))
        }
    };
    Ok(ProductCount {
        product_name: row.get(STOCK_PRODUCT_NAME.0).map(ToString::to_string),
        stock_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionResolver;
    use crate::test_helpers::MockExecutor;

    #[test]
    fn test_count_by_product_name() {
        let mock = MockExecutor::new();
        mock.push_rows(vec![
            FieldMap::new().with("Prodcut_name", "RX 7600").with("stock_count", 5i64),
            FieldMap::new().with_null("Prodcut_name").with("stock_count", 1i64),
        ]);
        let partitions = PartitionResolver::new().resolve("VGA").unwrap();
        let counts = StockStore::new(&mock, &partitions)
            .count_by_product_name()
            .unwrap();
        assert_eq!(
            counts,
            vec![
                ProductCount { product_name: Some("RX 7600".to_string()), stock_count: 5 },
                ProductCount { product_name: None, stock_count: 1 },
            ]
        );
        let sql = &mock.statements()[0];
        assert!(sql.contains(r#"GROUP BY "Prodcut_name""#), "{sql}");
        assert!(sql.contains(r#"ORDER BY "stock_count" DESC"#), "{sql}");
    }

    #[test]
    fn test_list_all_orders_by_serial() {
        let mock = MockExecutor::new();
        let partitions = PartitionResolver::new().resolve("MB").unwrap();
        StockStore::new(&mock, &partitions).list_all().unwrap();
        let sql = &mock.statements()[0];
        assert!(!sql.contains("WHERE"), "{sql}");
        assert!(sql.ends_with(r#"ORDER BY "Serial_No" ASC"#), "{sql}");
    }
}
