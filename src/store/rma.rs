//! RMA-only store operations.

use super::{RmaStore, StockStore};
use crate::executor::{StoreError, StoreExecutor};
use crate::partition::Partitions;
use crate::predicate;
use crate::schema::{EntitySchema, RmaSchema, REPLACEMENT_SN_IN_TW, RMA_NO};
use crate::value::FieldMap;
use serde::Serialize;

/// Search keys accepted by [`find_for_update`]
const UPDATE_LOOKUP_KEYS: &[&str] = &["serialNo", "pn", "sku"];

impl<'e, E: StoreExecutor + ?Sized> RmaStore<'e, E> {
    /// Records still waiting for a replacement unit (`Replacement_SN_in_TW` unset).
    pub fn pending_replacement(&self) -> Result<Vec<FieldMap>, StoreError> {
        predicate::select_by_presence::<RmaSchema>(self.partition(), REPLACEMENT_SN_IN_TW, true)
            .query(self.executor())
    }

    /// Records that already received a replacement unit.
    pub fn completed_replacement(&self) -> Result<Vec<FieldMap>, StoreError> {
        predicate::select_by_presence::<RmaSchema>(self.partition(), REPLACEMENT_SN_IN_TW, false)
            .query(self.executor())
    }

    pub fn exists_by_rma_no(&self, rma_no: &str) -> Result<bool, StoreError> {
        let rma_no = rma_no.trim();
        if rma_no.is_empty() {
            return Err(StoreError::InvalidInput("RMA number is required".to_string()));
        }
        let count = predicate::count(self.partition(), Some((RMA_NO, rma_no)))
            .count(self.executor())?;
        Ok(count > 0)
    }
}

/// What an operator needs to process one RMA: the record and the stock it can
/// consume.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateView {
    pub rma: Option<FieldMap>,
    pub stock: Vec<FieldMap>,
}

/// First RMA record matching serial/PN/SKU criteria, plus all stock of the line.
///
/// # Errors
///
/// Returns `StoreError::InvalidInput` if `criteria` uses any key other than
/// `serialNo`, `pn` or `sku`.
pub fn find_for_update<E: StoreExecutor + ?Sized>(
    executor: &E,
    partitions: &Partitions,
    criteria: &FieldMap,
) -> Result<UpdateView, StoreError> {
    if let Some(key) = criteria.keys().find(|k| !UPDATE_LOOKUP_KEYS.contains(k)) {
        return Err(StoreError::InvalidInput(format!(
            "'{key}' cannot be used to look up an {} for update",
            RmaSchema::LABEL
        )));
    }
    let rma = RmaStore::new(executor, partitions)
        .search(criteria)?
        .into_iter()
        .next();
    let stock = StockStore::new(executor, partitions).list_all()?;
    Ok(UpdateView { rma, stock })
}
