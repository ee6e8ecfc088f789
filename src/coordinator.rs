//! Cross-Entity Transaction Coordinator.
//!
//! Updates one RMA record and, when a replacement unit is consumed, deletes that
//! unit from the same product line's stock partition. Both statements run inside
//! one [`Transaction`]; nothing is committed unless every requested change hit a
//! row.

use crate::executor::{StoreError, StoreExecutor};
use crate::partition::Partitions;
use crate::predicate;
use crate::schema::RmaSchema;
use crate::store::{require_identity, RmaStore, StockStore};
use crate::transaction::Transaction;
use crate::value::FieldMap;
use log::{info, warn};

/// Row counts of a committed coordinated update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatedUpdate {
    pub rma_rows: u64,
    /// `None` when no stock unit was consumed
    pub stock_rows: Option<u64>,
}

/// Apply `fields` to RMA `serial_no` and consume stock unit `consume_stock`, atomically.
///
/// A blank or absent `consume_stock` means no stock is consumed; the update then
/// commits even if it changed no row. With stock requested, both the RMA update and
/// the stock delete must affect at least one row, otherwise everything is rolled
/// back.
///
/// # Errors
///
/// - `StoreError::InvalidInput` for a blank `serial_no` or a malformed field map
///   (before `BEGIN`)
/// - `StoreError::Transaction` when a statement fails or a required row was not
///   hit; the transaction is rolled back in both cases
pub fn update_rma_consuming_stock<E: StoreExecutor + ?Sized>(
    executor: &E,
    partitions: &Partitions,
    serial_no: &str,
    fields: &FieldMap,
    consume_stock: Option<&str>,
) -> Result<CoordinatedUpdate, StoreError> {
    let serial_no = require_identity(serial_no)?;
    let consume_stock = consume_stock.map(str::trim).filter(|s| !s.is_empty());
    // Malformed input must not open a transaction.
    predicate::assignments::<RmaSchema>(fields)?;

    let tx = Transaction::begin(executor)?;
    match apply(&tx, partitions, serial_no, fields, consume_stock) {
        Ok(outcome) => {
            tx.commit()
                .map_err(|e| StoreError::Transaction(format!("update failed: {e}")))?;
            info!(
                "Committed update of {serial_no} in {} (stock consumed: {})",
                partitions.rma(),
                consume_stock.unwrap_or("none")
            );
            Ok(outcome)
        }
        Err(reason) => {
            warn!("Rolling back update of {serial_no} in {}: {reason}", partitions.rma());
            if let Err(e) = tx.rollback() {
                warn!("Rollback failed: {e}");
            }
            Err(StoreError::Transaction(format!("update failed: {reason}")))
        }
    }
}

fn apply<E: StoreExecutor + ?Sized>(
    tx: &Transaction<'_, E>,
    partitions: &Partitions,
    serial_no: &str,
    fields: &FieldMap,
    consume_stock: Option<&str>,
) -> Result<CoordinatedUpdate, String> {
    let rma_rows = RmaStore::new(tx, partitions)
        .update(serial_no, fields)
        .map_err(|e| e.to_string())?;

    let Some(stock_serial) = consume_stock else {
        return Ok(CoordinatedUpdate { rma_rows, stock_rows: None });
    };

    if rma_rows == 0 {
        return Err(format!("RMA record {serial_no} was not updated"));
    }
    let stock_rows = StockStore::new(tx, partitions)
        .delete(stock_serial)
        .map_err(|e| e.to_string())?;
    if stock_rows == 0 {
        return Err(format!("stock unit {stock_serial} was not found"));
    }
    Ok(CoordinatedUpdate { rma_rows, stock_rows: Some(stock_rows) })
}
