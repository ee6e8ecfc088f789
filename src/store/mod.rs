//! Record Store: CRUD and search against one partition.
//!
//! A [`RecordStore`] is bound to an executor and to one resolved partition. It is
//! cheap to build per request; it holds no state besides those two references, and
//! performs no caching. "Not found" is always an empty result (`None`, `0` rows,
//! empty `Vec`), never an error.
//!
//! Entity-specific extras live in [`rma`] and [`stock`].

pub mod rma;
pub mod stock;

use crate::executor::{StoreError, StoreExecutor};
use crate::partition::{PartitionName, Partitions};
use crate::predicate;
use crate::schema::{EntitySchema, RmaSchema, StockSchema};
use crate::value::FieldMap;
use log::info;
use std::marker::PhantomData;

pub use rma::{find_for_update, UpdateView};
pub use stock::ProductCount;

/// Store over a product line's RMA partition
pub type RmaStore<'e, E> = RecordStore<'e, RmaSchema, E>;
/// Store over a product line's stock partition
pub type StockStore<'e, E> = RecordStore<'e, StockSchema, E>;

pub struct RecordStore<'e, S: EntitySchema, E: StoreExecutor + ?Sized> {
    executor: &'e E,
    partition: PartitionName,
    _schema: PhantomData<S>,
}

/// Reject a blank identity before any I/O.
pub(crate) fn require_identity(identity: &str) -> Result<&str, StoreError> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidInput("serial number is required".to_string()));
    }
    Ok(trimmed)
}

impl<'e, S: EntitySchema, E: StoreExecutor + ?Sized> RecordStore<'e, S, E> {
    pub fn new(executor: &'e E, partitions: &Partitions) -> Self {
        Self {
            executor,
            partition: partitions.for_kind(S::KIND).clone(),
            _schema: PhantomData,
        }
    }

    pub fn partition(&self) -> &PartitionName {
        &self.partition
    }

    pub(crate) fn executor(&self) -> &'e E {
        self.executor
    }

    /// All records matching the sparse criteria, in the entity's default order.
    ///
    /// Empty criteria return the whole partition.
    pub fn search(&self, criteria: &FieldMap) -> Result<Vec<FieldMap>, StoreError> {
        predicate::select::<S>(&self.partition, criteria)?.query(self.executor)
    }

    pub fn get(&self, identity: &str) -> Result<Option<FieldMap>, StoreError> {
        let identity = require_identity(identity)?;
        let rows = predicate::select_by_identity::<S>(&self.partition, identity)
            .query(self.executor)?;
        Ok(rows.into_iter().next())
    }

    pub fn exists(&self, identity: &str) -> Result<bool, StoreError> {
        let identity = require_identity(identity)?;
        let count = predicate::count(&self.partition, Some((S::identity(), identity)))
            .count(self.executor)?;
        Ok(count > 0)
    }

    /// Insert a record. Does not check for an existing identity; a duplicate
    /// surfaces as whatever the backend's unique constraint reports.
    pub fn insert(&self, fields: &FieldMap) -> Result<u64, StoreError> {
        let rows = predicate::insert::<S>(&self.partition, fields)?.execute(self.executor)?;
        info!("Inserted {} into {} ({rows} row(s))", S::LABEL, self.partition);
        Ok(rows)
    }

    /// Partial update by identity. Only supplied, non-blank fields change.
    ///
    /// Returns the affected row count; `0` when the identity does not exist or when
    /// no field was supplied (no statement is issued then).
    pub fn update(&self, identity: &str, fields: &FieldMap) -> Result<u64, StoreError> {
        let identity = require_identity(identity)?;
        let Some(statement) = predicate::update::<S>(&self.partition, identity, fields)? else {
            return Ok(0);
        };
        let rows = statement.execute(self.executor)?;
        info!(
            "Updated {} {identity} in {} ({rows} row(s))",
            S::LABEL,
            self.partition
        );
        Ok(rows)
    }

    pub fn delete(&self, identity: &str) -> Result<u64, StoreError> {
        let identity = require_identity(identity)?;
        let rows = predicate::delete::<S>(&self.partition, identity).execute(self.executor)?;
        info!(
            "Deleted {} {identity} from {} ({rows} row(s))",
            S::LABEL,
            self.partition
        );
        Ok(rows)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        predicate::count(&self.partition, None).count(self.executor)
    }

    /// Records whose keyword columns contain `keyword`. A blank keyword matches
    /// everything.
    pub fn keyword_search(&self, keyword: &str) -> Result<Vec<FieldMap>, StoreError> {
        predicate::keyword::<S>(&self.partition, keyword).query(self.executor)
    }
}
