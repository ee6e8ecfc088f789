//! Service flow against a real PostgreSQL database.
//!
//! Skipped unless `TEST_DATABASE_URL` is set. Each test creates its own pair of
//! partition tables under a throwaway product line and drops them afterwards.

use rmaguard::{
    FieldMap, Operation, PartitionResolver, PgExecutor, ProductLineRegistry, RmaService,
    StockService, StoreExecutor,
};
use std::sync::Arc;

/// Throwaway product-line id: `T` plus 16 hex digits, inside the identifier limit.
fn scratch_line() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("T{}", &id[..16])
}

struct Scratch {
    executor: PgExecutor,
    line: String,
}

impl Scratch {
    fn open() -> Option<Self> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let executor = PgExecutor::connect(&url).expect("TEST_DATABASE_URL is not reachable");
        let line = scratch_line();
        let scratch = Self { executor, line };
        scratch.create_tables();
        Some(scratch)
    }

    fn create_tables(&self) {
        let rma = format!(
            r#"CREATE TABLE "{}_RMA_record" (
                "Rma_No" TEXT, "Customer_Name" TEXT, "Serial_No" TEXT PRIMARY KEY,
                "PN" TEXT, "SKU" TEXT, "Product_Name" TEXT,
                "Sell_Ship_Date" DATE, "Create_Date" DATE, "Return_Date" DATE,
                "Failure_desc" TEXT, "VI_Damage_Status" TEXT, "Test_Result_Desc" TEXT,
                "Replacement_SN_in_TW" TEXT, "Replacement_PN_in_TW" TEXT,
                "Replacement_SKU_in_TW" TEXT, "Replacement_SN_from_HK" TEXT,
                "Replacement_PN_from_HK" TEXT, "Replacement_SKU_from_HK" TEXT,
                "RMA_board_Test_Result" TEXT, "End_user_invoice_date" DATE,
                "Warranty_Until" DATE, "Remark" TEXT
            )"#,
            self.line
        );
        let stock = format!(
            r#"CREATE TABLE "{}_buffer_stock" (
                "Prodcut_name" TEXT, "PN" TEXT, "SKU" TEXT, "Serial_No" TEXT PRIMARY KEY
            )"#,
            self.line
        );
        self.executor.execute(&rma, &[]).unwrap();
        self.executor.execute(&stock, &[]).unwrap();
    }

    fn registry(&self) -> Arc<ProductLineRegistry> {
        Arc::new(ProductLineRegistry::with_lines([self.line.as_str()]).unwrap())
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for table in ["RMA_record", "buffer_stock"] {
            let sql = format!(r#"DROP TABLE IF EXISTS "{}_{table}""#, self.line);
            if let Err(e) = self.executor.execute(&sql, &[]) {
                eprintln!("cleanup of {sql} failed: {e}");
            }
        }
    }
}

#[test]
fn test_scratch_line_is_a_valid_product_line() {
    let line = scratch_line();
    let partitions = PartitionResolver::new().resolve(&line).unwrap();
    assert_eq!(partitions.rma().as_str(), format!("{line}_RMA_record"));
    assert!(ProductLineRegistry::with_lines([line.as_str()]).is_ok());
    assert_ne!(scratch_line(), line);
}

#[test]
fn test_rma_lifecycle_with_stock_consumption() {
    let Some(db) = Scratch::open() else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let rma = RmaService::new(&db.executor, db.registry());
    let stock = StockService::new(&db.executor, db.registry());
    let line = db.line.as_str();

    let created = rma.create(
        line,
        &FieldMap::new()
            .with("Serial_No", "SN-1")
            .with("Customer_Name", "Acme 100% Ltd")
            .with("Create_Date", "2024-03-15"),
    );
    assert!(created.success, "{}", created.message);
    assert!(!rma.create(line, &FieldMap::new().with("Serial_No", "SN-1")).success);

    assert!(stock
        .create(line, &FieldMap::new().with("Serial_No", "T-1").with("Prodcut_name", "RTX"))
        .success);
    assert!(stock
        .create(line, &FieldMap::new().with("Serial_No", "T-2").with("Prodcut_name", "RTX"))
        .success);

    let search = rma.search(line, &FieldMap::new().with("customerName", "100%"));
    assert_eq!(search.data.map(|rows| rows.len()), Some(1));
    assert_eq!(rma.pending_replacement(line).data.map(|r| r.len()), Some(1));

    let updated = rma.update(
        line,
        "SN-1",
        &FieldMap::new().with("Replacement_SN_in_TW", "T-1"),
        Some("T-1"),
    );
    assert!(updated.success, "{}", updated.message);
    assert_eq!(updated.operation, Operation::UpdateWithStockDelete);
    assert!(!stock.exists(line, "T-1"));
    assert!(stock.exists(line, "T-2"));
    assert_eq!(rma.completed_replacement(line).data.map(|r| r.len()), Some(1));

    // Missing stock unit: the RMA change is rolled back too.
    let failed = rma.update(
        line,
        "SN-1",
        &FieldMap::new().with("Remark", "should not stick"),
        Some("T-404"),
    );
    assert!(!failed.success);
    let record = rma.get(line, "SN-1").data.unwrap();
    assert_eq!(record.get_text("Remark"), None);

    let stats = stock.stats(line).data.unwrap();
    assert_eq!(stats.total_count, 1);

    assert!(rma.delete(line, "SN-1").success);
    assert!(!rma.exists(line, "SN-1"));
}
