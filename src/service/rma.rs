use super::{Operation, Outcome, ProductLineGate};
use crate::coordinator::{update_rma_consuming_stock, CoordinatedUpdate};
use crate::executor::{StoreError, StoreExecutor};
use crate::partition::Partitions;
use crate::registry::ProductLineRegistry;
use crate::schema::{EntitySchema, RmaSchema};
use crate::store::{find_for_update, RmaStore, StockStore, UpdateView};
use crate::value::FieldMap;
use log::warn;
use std::sync::Arc;

/// RMA operations for every registered product line
pub struct RmaService<E: StoreExecutor> {
    executor: E,
    gate: ProductLineGate,
}

impl<E: StoreExecutor> RmaService<E> {
    pub fn new(executor: E, registry: Arc<ProductLineRegistry>) -> Self {
        Self {
            executor,
            gate: ProductLineGate::new(registry),
        }
    }

    pub fn registry(&self) -> &Arc<ProductLineRegistry> {
        self.gate.registry()
    }

    /// Gate the product line, run `f`, and fold any error into a failed outcome.
    fn run<T>(
        &self,
        operation: Operation,
        product_type: &str,
        f: impl FnOnce(RmaStore<'_, E>, &Partitions) -> Result<Outcome<T>, StoreError>,
    ) -> Outcome<T> {
        let partitions = match self.gate.open(product_type) {
            Ok(partitions) => partitions,
            Err(message) => return Outcome::failure(operation, message),
        };
        let store = RmaStore::new(&self.executor, &partitions);
        match f(store, &partitions) {
            Ok(outcome) => outcome.with_product_type(partitions.product_line()),
            Err(e) => {
                warn!("{operation} on {} failed: {e}", partitions.rma());
                Outcome::failure(operation, failure_message(operation, &e))
                    .with_product_type(partitions.product_line())
            }
        }
    }

    /// Sparse-criteria search. Unknown keys fail the operation.
    pub fn search(&self, product_type: &str, criteria: &FieldMap) -> Outcome<Vec<FieldMap>> {
        self.run(Operation::Search, product_type, |store, partitions| {
            let records = store.search(criteria)?;
            Ok(found(records, partitions))
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

    /// Records still waiting for a replacement unit.
    pub fn pending_replacement(&self, product_type: &str) -> Outcome<Vec<FieldMap>> {
        self.run(Operation::Search, product_type, |store, partitions| {
            Ok(found(store.pending_replacement()?, partitions))
        })
    }

    pub fn completed_replacement(&self, product_type: &str) -> Outcome<Vec<FieldMap>> {
        self.run(Operation::Search, product_type, |store, partitions| {
            Ok(found(store.completed_replacement()?, partitions))
        })
    }

    pub fn get(&self, product_type: &str, serial_no: &str) -> Outcome<FieldMap> {
        self.run(Operation::Get, product_type, |store, partitions| {
            Ok(match store.get(serial_no)? {
                Some(record) => Outcome::success(Operation::Get, "RMA record found")
                    .with_serial_no(serial_no.trim())
                    .with_data(record),
                None => Outcome::failure(Operation::Get, not_found(serial_no, partitions))
                    .with_serial_no(serial_no.trim()),
            })
        })
    }

    /// `false` for unknown product lines and on storage errors.
    pub fn exists(&self, product_type: &str, serial_no: &str) -> bool {
        let Ok(partitions) = self.gate.open(product_type) else {
            return false;
        };
        RmaStore::new(&self.executor, &partitions)
            .exists(serial_no)
            .unwrap_or(false)
    }

    /// All stock of the line, for picking a replacement before any RMA is chosen.
    pub fn load_update_page(&self, product_type: &str) -> Outcome<UpdateView> {
        self.run(Operation::Get, product_type, |_, partitions| {
            let stock = StockStore::new(&self.executor, partitions).list_all()?;
            let message = format!(
                "loaded {} stock record(s) for {}",
                stock.len(),
                partitions.product_line()
            );
            Ok(Outcome::success(Operation::Get, message).with_data(UpdateView { rma: None, stock }))
        })
    }

    /// First RMA matching serial/PN/SKU, plus the line's stock.
    pub fn find_for_update(&self, product_type: &str, criteria: &FieldMap) -> Outcome<UpdateView> {
        self.run(Operation::Get, product_type, |_, partitions| {
            let view = find_for_update(&self.executor, partitions, criteria)?;
            let message = if view.rma.is_some() {
                format!("RMA record found, {} stock record(s) loaded", view.stock.len())
            } else {
                format!(
                    "no matching RMA record, {} stock record(s) loaded",
                    view.stock.len()
                )
            };
            Ok(Outcome::success(Operation::Get, message).with_data(view))
        })
    }

    /// Create a record; `Serial_No` is required and must not exist yet.
    pub fn create(&self, product_type: &str, fields: &FieldMap) -> Outcome<()> {
        let Some(serial_no) = identity_of(fields) else {
            return Outcome::failure(
                Operation::Create,
                format!("{} is required", RmaSchema::identity().0),
            );
        };
        self.run(Operation::Create, product_type, |store, partitions| {
            if store.exists(&serial_no)? {
                return Ok(Outcome::failure(
                    Operation::Create,
                    format!(
                        "serial number {serial_no} already exists in {}",
                        partitions.product_line()
                    ),
                )
                .with_serial_no(serial_no));
            }
            Ok(match store.insert(fields)? {
                0 => Outcome::failure(Operation::Create, "create failed: no row was inserted"),
                _ => Outcome::success(
                    Operation::Create,
                    format!("RMA record {serial_no} created"),
                ),
            }
            .with_serial_no(serial_no))
        })
    }

    /// Partial update, optionally consuming one stock unit in the same transaction.
    pub fn update(
        &self,
        product_type: &str,
        serial_no: &str,
        fields: &FieldMap,
        consume_stock: Option<&str>,
    ) -> Outcome<CoordinatedUpdate> {
        let consume_stock = consume_stock.map(str::trim).filter(|s| !s.is_empty());
        let operation = if consume_stock.is_some() {
            Operation::UpdateWithStockDelete
        } else {
            Operation::Update
        };
        let serial_no = serial_no.trim();
        self.run(operation, product_type, |store, partitions| {
            if !store.exists(serial_no)? {
                return Ok(Outcome::failure(operation, not_found(serial_no, partitions))
                    .with_serial_no(serial_no));
            }
            let result = update_rma_consuming_stock(
                &self.executor,
                partitions,
                serial_no,
                fields,
                consume_stock,
            )?;
            let message = match consume_stock {
                Some(stock) => format!("RMA record {serial_no} updated, stock {stock} consumed"),
                None => format!("RMA record {serial_no} updated"),
            };
            Ok(Outcome::success(operation, message)
                .with_serial_no(serial_no)
                .with_data(result))
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
                _ => Outcome::success(Operation::Delete, format!("RMA record {serial_no} deleted")),
            }
            .with_serial_no(serial_no))
        })
    }
}

/// A rolled-back unit of work already reads "update failed: ..."; everything else
/// gets the operation's verb.
pub(super) fn failure_message(operation: Operation, error: &StoreError) -> String {
    match error {
        StoreError::Transaction(reason) => reason.clone(),
        other => format!("{} failed: {other}", operation_verb(operation)),
    }
}

pub(super) fn operation_verb(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "create",
        Operation::Update | Operation::UpdateWithStockDelete => "update",
        Operation::Delete => "delete",
        Operation::Search => "search",
        Operation::Get => "lookup",
        Operation::Stats => "statistics",
        Operation::Batch => "batch",
    }
}

pub(super) fn found(records: Vec<FieldMap>, partitions: &Partitions) -> Outcome<Vec<FieldMap>> {
    let message = format!(
        "found {} record(s) for {}",
        records.len(),
        partitions.product_line()
    );
    Outcome::success(Operation::Search, message).with_data(records)
}

pub(super) fn not_found(serial_no: &str, partitions: &Partitions) -> String {
    format!(
        "serial number {} does not exist in {}",
        serial_no.trim(),
        partitions.product_line()
    )
}

pub(super) fn identity_of(fields: &FieldMap) -> Option<String> {
    fields
        .get(RmaSchema::identity().0)
        .filter(|v| !v.is_blank())
        .map(|v| v.to_string().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockExecutor;

    fn service(mock: &MockExecutor) -> RmaService<&MockExecutor> {
        let registry = Arc::new(ProductLineRegistry::with_lines(["VGA", "MB"]).unwrap());
        RmaService::new(mock, registry)
    }

    #[test]
    fn test_invalid_product_line_fails_without_io() {
        let mock = MockExecutor::new();
        let outcome = service(&mock).search("NB", &FieldMap::new());
        assert!(!outcome.success);
        assert_eq!(outcome.operation, Operation::Search);
        assert!(outcome.message.contains("VGA, MB"));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_search_reports_count() {
        let mock = MockExecutor::new();
        mock.push_rows(vec![FieldMap::new().with("Serial_No", "S1")]);
        let outcome = service(&mock).search("VGA", &FieldMap::new().with("pn", "P1"));
        assert!(outcome.success);
        assert_eq!(outcome.product_type.as_deref(), Some("VGA"));
        assert_eq!(outcome.data.unwrap().len(), 1);
        assert!(outcome.message.contains("found 1 record(s)"));
    }

    #[test]
    fn test_search_with_unknown_key_is_a_failed_outcome() {
        let mock = MockExecutor::new();
        let outcome = service(&mock).search("VGA", &FieldMap::new().with("color", "red"));
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("search failed: Invalid input"));
    }

    #[test]
    fn test_create_rejects_existing_serial() {
        let mock = MockExecutor::new();
        mock.push_count(1);
        let fields = FieldMap::new().with("Serial_No", "S1").with("PN", "P1");
        let outcome = service(&mock).create("VGA", &fields);
        assert!(!outcome.success);
        assert!(outcome.message.contains("already exists"));
        assert_eq!(mock.data_statements().len(), 1);
    }

    #[test]
    fn test_create_requires_serial() {
        let mock = MockExecutor::new();
        let outcome = service(&mock).create("VGA", &FieldMap::new().with("PN", "P1"));
        assert!(!outcome.success);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_create_inserts() {
        let mock = MockExecutor::new();
        mock.push_count(0).push_affected(1);
        let fields = FieldMap::new().with("Serial_No", "S1").with("PN", "P1");
        let outcome = service(&mock).create("VGA", &fields);
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.serial_no.as_deref(), Some("S1"));
        assert!(mock.statements()[1].starts_with(r#"INSERT INTO "VGA_RMA_record""#));
    }

    #[test]
    fn test_update_with_stock_uses_transaction() {
        let mock = MockExecutor::new();
        mock.push_count(1).push_affected(1).push_affected(1);
        let fields = FieldMap::new().with("Replacement_SN_in_TW", "T1");
        let outcome = service(&mock).update("VGA", "S1", &fields, Some("T1"));
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.operation, Operation::UpdateWithStockDelete);
        assert_eq!(
            outcome.data,
            Some(CoordinatedUpdate { rma_rows: 1, stock_rows: Some(1) })
        );
        assert!(mock.statements().contains(&"COMMIT".to_string()));
    }

    #[test]
    fn test_update_missing_record_is_not_found() {
        let mock = MockExecutor::new();
        mock.push_count(0);
        let outcome = service(&mock).update("MB", "S9", &FieldMap::new().with("Remark", "x"), None);
        assert!(!outcome.success);
        assert_eq!(outcome.operation, Operation::Update);
        assert!(outcome.message.contains("does not exist in MB"));
        assert!(!mock.statements().iter().any(|s| s == "BEGIN"));
    }

    #[test]
    fn test_update_rollback_surfaces_as_update_failed() {
        let mock = MockExecutor::new();
        mock.push_count(1).push_affected(1).push_affected(0);
        let fields = FieldMap::new().with("Remark", "x");
        let outcome = service(&mock).update("VGA", "S1", &fields, Some("T404"));
        assert!(!outcome.success);
        assert_eq!(outcome.message, "update failed: stock unit T404 was not found");
        assert_eq!(mock.statements().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_delete_twice_reports_not_found_both_times() {
        let mock = MockExecutor::new();
        mock.push_count(0).push_count(0);
        let service = service(&mock);
        for _ in 0..2 {
            let outcome = service.delete("VGA", "GONE");
            assert!(!outcome.success);
            assert!(outcome.message.contains("does not exist"));
        }
    }

    #[test]
    fn test_storage_error_becomes_failed_outcome() {
        let mock = MockExecutor::new();
        mock.push_error("server closed the connection unexpectedly");
        let outcome = service(&mock).get("VGA", "S1");
        assert!(!outcome.success);
        assert!(outcome.message.contains("server closed the connection"));
    }

    #[test]
    fn test_exists_is_false_for_unknown_line() {
        let mock = MockExecutor::new();
        assert!(!service(&mock).exists("NB", "S1"));
    }
}
