use super::rma::{failure_message, found, identity_of, not_found};
use super::{Operation, Outcome, ProductLineGate};
use crate::executor::{StoreError, StoreExecutor};
use crate::partition::Partitions;
use crate::registry::ProductLineRegistry;
use crate::store::{ProductCount, StockStore};
use crate::value::FieldMap;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Stock statistics of one product line
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockStats {
    pub product_type: String,
    pub total_count: i64,
    pub by_product: Vec<ProductCount>,
    pub last_updated: DateTime<Utc>,
}

/// Result of deleting several stock units one by one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteSummary {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Stock operations for every registered product line
pub struct StockService<E: StoreExecutor> {
    executor: E,
    gate: ProductLineGate,
}

impl<E: StoreExecutor> StockService<E> {
    pub fn new(executor: E, registry: Arc<ProductLineRegistry>) -> Self {
        Self {
            executor,
            gate: ProductLineGate::new(registry),
        }
    }

    fn run<T>(
        &self,
        operation: Operation,
        product_type: &str,
        f: impl FnOnce(StockStore<'_, E>, &Partitions) -> Result<Outcome<T>, StoreError>,
    ) -> Outcome<T> {
        let partitions = match self.gate.open(product_type) {
            Ok(partitions) => partitions,
            Err(message) => return Outcome::failure(operation, message),
        };
        let store = StockStore::new(&self.executor, &partitions);
        match f(store, &partitions) {
            Ok(outcome) => outcome.with_product_type(partitions.product_line()),
            Err(e) => {
                warn!("{operation} on {} failed: {e}", partitions.stock());
                Outcome::failure(operation, failure_message(operation, &e))
                    .with_product_type(partitions.product_line())
            }
        }
    }

    pub fn list_all(&self, product_type: &str) -> Outcome<Vec<FieldMap>> {
        self.run(Operation::Search, product_type, |store, partitions| {
            Ok(found(store.list_all()?, partitions))
        })
    }

    pub fn search(&self, product_type: &str, criteria: &FieldMap) -> Outcome<Vec<FieldMap>> {
        self.run(Operation::Search, product_type, |store, partitions| {
            Ok(found(store.search(criteria)?, partitions))
        })
    }

    pub fn keyword_search(&self, product_type: &str, keyword: &str) -> Outcome<Vec<FieldMap>> {
        if keyword.trim().is_empty() {
            return Outcome::failure(Operation::Search, "search keyword must not be empty");
        }
        self.run(Operation::Search, product_type, |store, partitions| {
            Ok(found(store.keyword_search(keyword)?, partitions))
        })
    }

    pub fn get(&self, product_type: &str, serial_no: &str) -> Outcome<FieldMap> {
        self.run(Operation::Get, product_type, |store, partitions| {
            Ok(match store.get(serial_no)? {
                Some(record) => Outcome::success(Operation::Get, "stock record found")
                    .with_serial_no(serial_no.trim())
                    .with_data(record),
                None => Outcome::failure(Operation::Get, not_found(serial_no, partitions))
                    .with_serial_no(serial_no.trim()),
            })
        })
    }

    pub fn exists(&self, product_type: &str, serial_no: &str) -> bool {
        let Ok(partitions) = self.gate.open(product_type) else {
            return false;
        };
        StockStore::new(&self.executor, &partitions)
            .exists(serial_no)
            .unwrap_or(false)
    }

    pub fn create(&self, product_type: &str, fields: &FieldMap) -> Outcome<()> {
        let Some(serial_no) = identity_of(fields) else {
            return Outcome::failure(Operation::Create, "Serial_No is required");
        };
        self.run(Operation::Create, product_type, |store, partitions| {
            if store.exists(&serial_no)? {
                return Ok(Outcome::failure(
                    Operation::Create,
                    format!(
                        "serial number {serial_no} already exists in {} stock",
                        partitions.product_line()
                    ),
                )
                .with_serial_no(serial_no));
            }
            Ok(match store.insert(fields)? {
                0 => Outcome::failure(Operation::Create, "create failed: no row was inserted"),
                _ => Outcome::success(Operation::Create, format!("stock record {serial_no} created")),
            }
            .with_serial_no(serial_no))
        })
    }

    /// Partial update of a stock unit. Not part of the normal consume flow.
    pub fn update(&self, product_type: &str, serial_no: &str, fields: &FieldMap) -> Outcome<()> {
        let serial_no = serial_no.trim();
        self.run(Operation::Update, product_type, |store, partitions| {
            if !store.exists(serial_no)? {
                return Ok(Outcome::failure(Operation::Update, not_found(serial_no, partitions))
                    .with_serial_no(serial_no));
            }
            Ok(match store.update(serial_no, fields)? {
                0 => Outcome::failure(Operation::Update, "update failed: no row was changed"),
                _ => Outcome::success(Operation::Update, format!("stock record {serial_no} updated")),
            }
            .with_serial_no(serial_no))
        })
    }

    pub fn delete(&self, product_type: &str, serial_no: &str) -> Outcome<()> {
        let serial_no = serial_no.trim();
        self.run(Operation::Delete, product_type, |store, partitions| {
            if !store.exists(serial_no)? {
                return Ok(Outcome::failure(Operation::Delete, not_found(serial_no, partitions))
                    .with_serial_no(serial_no));
            }
            Ok(match store.delete(serial_no)? {
                0 => Outcome::failure(Operation::Delete, "delete failed: no row was deleted"),
                _ => Outcome::success(Operation::Delete, format!("stock record {serial_no} deleted")),
            }
            .with_serial_no(serial_no))
        })
    }

    /// Delete each serial independently; one failure does not stop the rest.
    pub fn delete_many(&self, product_type: &str, serial_nos: &[String]) -> Outcome<BatchDeleteSummary> {
        if serial_nos.iter().all(|s| s.trim().is_empty()) {
            return Outcome::failure(Operation::Batch, "no serial numbers to delete");
        }
        self.run(Operation::Batch, product_type, |store, _| {
            let mut summary = BatchDeleteSummary::default();
            for serial_no in serial_nos.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
                match store.delete(serial_no) {
                    Ok(rows) if rows > 0 => summary.deleted.push(serial_no.to_string()),
                    Ok(_) => summary.failed.push(serial_no.to_string()),
                    Err(e) => {
                        warn!("Deleting stock {serial_no} failed: {e}");
                        summary.failed.push(serial_no.to_string());
                    }
                }
            }
            let message = format!(
                "batch delete finished: {} deleted, {} failed",
                summary.deleted.len(),
                summary.failed.len()
            );
            info!("{message}");
            Ok(Outcome::success(Operation::Batch, message).with_data(summary))
        })
    }

    pub fn stats(&self, product_type: &str) -> Outcome<StockStats> {
        self.run(Operation::Stats, product_type, |store, partitions| {
            let stats = StockStats {
                product_type: partitions.product_line().to_string(),
                total_count: store.count()?,
                by_product: store.count_by_product_name()?,
                last_updated: Utc::now(),
            };
            Ok(Outcome::success(Operation::Stats, "stock statistics loaded").with_data(stats))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockExecutor;

    fn service(mock: &MockExecutor) -> StockService<&MockExecutor> {
        let registry = Arc::new(ProductLineRegistry::with_lines(["VGA"]).unwrap());
        StockService::new(mock, registry)
    }

    #[test]
    fn test_stats() {
        let mock = MockExecutor::new();
        mock.push_count(6).push_rows(vec![
            FieldMap::new().with("Prodcut_name", "RX 7600").with("stock_count", 4i64),
            FieldMap::new().with("Prodcut_name", "RX 7700").with("stock_count", 2i64),
        ]);
        let outcome = service(&mock).stats("VGA");
        assert!(outcome.success, "{}", outcome.message);
        let stats = outcome.data.unwrap();
        assert_eq!(stats.total_count, 6);
        assert_eq!(stats.by_product.len(), 2);
        assert_eq!(stats.by_product[0].product_name.as_deref(), Some("RX 7600"));

        let json = serde_json::to_value(&service(&MockExecutor::new()).stats("VGA")).unwrap();
        assert_eq!(json["operation"], "STATS");
        assert_eq!(json["data"]["totalCount"], 0);
    }

    #[test]
    fn test_delete_many_keeps_going() {
        let mock = MockExecutor::new();
        mock.push_affected(1).push_affected(0).push_error("lock timeout");
        let serials = vec!["T1".to_string(), "T2".to_string(), " ".to_string(), "T3".to_string()];
        let outcome = service(&mock).delete_many("VGA", &serials);
        assert!(outcome.success);
        assert_eq!(
            outcome.data.unwrap(),
            BatchDeleteSummary {
                deleted: vec!["T1".to_string()],
                failed: vec!["T2".to_string(), "T3".to_string()],
            }
        );
    }

    #[test]
    fn test_delete_many_requires_serials() {
        let mock = MockExecutor::new();
        assert!(!service(&mock).delete_many("VGA", &[]).success);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_update_checks_existence_first() {
        let mock = MockExecutor::new();
        mock.push_count(1).push_affected(1);
        let outcome = service(&mock).update("VGA", "T1", &FieldMap::new().with("PN", "P2"));
        assert!(outcome.success, "{}", outcome.message);
        let statements = mock.statements();
        assert!(statements[0].contains("COUNT(*)"));
        assert!(statements[1].starts_with(r#"UPDATE "VGA_buffer_stock""#));
    }

    #[test]
    fn test_keyword_must_not_be_blank() {
        let mock = MockExecutor::new();
        let outcome = service(&mock).keyword_search("VGA", "  ");
        assert!(!outcome.success);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_create_duplicate_is_conflict_message() {
        let mock = MockExecutor::new();
        mock.push_count(1);
        let outcome = service(&mock).create("VGA", &FieldMap::new().with("Serial_No", "T1"));
        assert!(!outcome.success);
        assert!(outcome.message.contains("already exists in VGA stock"));
    }
}
