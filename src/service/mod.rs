//! Service layer.
//!
//! Services are what callers (the CLI, an HTTP front end) talk to. Each public
//! operation validates the product line against the registry, resolves partitions,
//! runs the store or coordinator, and folds every outcome, including storage
//! errors, into an [`Outcome`]. None of them return `Err` or panic.

pub mod rma;
pub mod stock;

pub use rma::RmaService;
pub use stock::{BatchDeleteSummary, StockService, StockStats};

use crate::partition::{PartitionResolver, Partitions};
use crate::registry::ProductLineRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Operation tag carried by every outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    UpdateWithStockDelete,
    Delete,
    Search,
    Get,
    Stats,
    Batch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::UpdateWithStockDelete => "UPDATE_WITH_STOCK_DELETE",
            Operation::Delete => "DELETE",
            Operation::Search => "SEARCH",
            Operation::Get => "GET",
            Operation::Stats => "STATS",
            Operation::Batch => "BATCH",
        };
        f.write_str(tag)
    }
}

/// Structured result of a service operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome<T> {
    pub success: bool,
    pub operation: Operation,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Outcome<T> {
    pub fn success(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            success: true,
            operation,
            message: message.into(),
            product_type: None,
            serial_no: None,
            data: None,
        }
    }

    pub fn failure(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(operation, message)
        }
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    pub fn with_serial_no(mut self, serial_no: impl Into<String>) -> Self {
        self.serial_no = Some(serial_no.into());
        self
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Registry check plus partition resolution shared by the services.
#[derive(Debug, Clone)]
pub(crate) struct ProductLineGate {
    registry: Arc<ProductLineRegistry>,
    resolver: PartitionResolver,
}

impl ProductLineGate {
    pub(crate) fn new(registry: Arc<ProductLineRegistry>) -> Self {
        Self {
            registry,
            resolver: PartitionResolver::new(),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<ProductLineRegistry> {
        &self.registry
    }

    /// Partitions of a registered product line, or the failure message.
    pub(crate) fn open(&self, product_type: &str) -> Result<Partitions, String> {
        let product_type = product_type.trim();
        if !self.registry.is_valid(product_type) {
            return Err(format!(
                "invalid product line: '{product_type}' (valid: {})",
                self.registry.names().join(", ")
            ));
        }
        self.resolver
            .resolve(product_type)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_tags_serialize_screaming() {
        let json = serde_json::to_string(&Operation::UpdateWithStockDelete).unwrap();
        assert_eq!(json, "\"UPDATE_WITH_STOCK_DELETE\"");
        assert_eq!(Operation::Stats.to_string(), "STATS");
    }

    #[test]
    fn test_outcome_shape() {
        let outcome: Outcome<Vec<u8>> = Outcome::success(Operation::Create, "created")
            .with_product_type("VGA")
            .with_serial_no("S1");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["operation"], "CREATE");
        assert_eq!(json["productType"], "VGA");
        assert_eq!(json["serialNo"], "S1");
        assert!(json.get("data").is_none());

        let failed: Outcome<()> = Outcome::failure(Operation::Delete, "nope");
        assert!(!failed.is_success());
        assert_eq!(failed.operation, Operation::Delete);
    }

    #[test]
    fn test_gate_lists_valid_lines() {
        let registry = Arc::new(ProductLineRegistry::with_lines(["VGA", "MB"]).unwrap());
        let gate = ProductLineGate::new(registry);
        assert_eq!(gate.open(" VGA ").unwrap().rma().as_str(), "VGA_RMA_record");
        let message = gate.open("NB").unwrap_err();
        assert!(message.contains("'NB'"));
        assert!(message.contains("VGA, MB"));
    }
}
