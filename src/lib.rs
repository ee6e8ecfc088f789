//! # rmaguard
//!
//! Product-line partitioned RMA and spare-stock data access over PostgreSQL.
//!
//! Every product line owns two tables, `<line>_RMA_record` and `<line>_buffer_stock`.
//! Callers hand in a product-line identifier; the [`partition`] resolver turns it into
//! table names, [`predicate`] builds parameterized statements from sparse
//! [`FieldMap`]s, and [`store`] runs them. [`coordinator`] performs the one
//! multi-statement unit of work (update an RMA, consume a stock unit), and [`batch`]
//! supervises the external reconciliation worker.
//!
//! The [`service`] layer wraps all of it behind the product-line [`registry`] and
//! reports every result as an [`Outcome`].

pub mod batch;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod executor;
pub mod metrics;
pub mod partition;
pub mod predicate;
pub mod registry;
pub mod schema;
pub mod service;
pub mod staging;
pub mod store;
pub mod transaction;
pub mod value;
mod value_conversion;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use batch::{BatchError, BatchOrchestrator, BatchReport, BatchState};
pub use config::RmaConfig;
pub use coordinator::{update_rma_consuming_stock, CoordinatedUpdate};
pub use executor::{PgExecutor, StoreError, StoreExecutor};
pub use partition::{PartitionResolver, Partitions};
pub use registry::{ProductLineRegistry, ProductLineStore};
pub use schema::{EntitySchema, RmaSchema, StockSchema};
pub use service::{Operation, Outcome, RmaService, StockService};
pub use staging::{StagingArea, StagingError};
pub use store::{RecordStore, RmaStore, StockStore};
pub use transaction::{IsolationLevel, Transaction};
pub use value::{FieldMap, FieldValue};
