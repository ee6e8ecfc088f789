//! Partition Resolver.
//!
//! The only place product-line identifiers are turned into physical table names.
//! Stores and the coordinator take a resolved [`Partitions`] and never format names
//! themselves.

use crate::executor::StoreError;
use crate::schema::EntityKind;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_query::Iden;
use std::fmt;

const RMA_SUFFIX: &str = "_RMA_record";
const STOCK_SUFFIX: &str = "_buffer_stock";

/// Allowed shape of a product-line identifier.
pub(crate) static PRODUCT_LINE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,32}$").expect("static pattern"));

/// Physical name of one partition table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionName(String);

impl PartitionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Iden for PartitionName {
    fn unquoted(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two partitions owned by one product line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    product_line: String,
    rma: PartitionName,
    stock: PartitionName,
}

impl Partitions {
    pub fn product_line(&self) -> &str {
        &self.product_line
    }

    pub fn rma(&self) -> &PartitionName {
        &self.rma
    }

    pub fn stock(&self) -> &PartitionName {
        &self.stock
    }

    pub fn for_kind(&self, kind: EntityKind) -> &PartitionName {
        match kind {
            EntityKind::Rma => &self.rma,
            EntityKind::Stock => &self.stock,
        }
    }
}

/// Derives partition names from a product-line identifier.
///
/// Only structural checks happen here (non-blank, allow-listed characters). Whether
/// the identifier is a registered product line is the caller's check, see
/// [`crate::registry::ProductLineRegistry::is_valid`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionResolver;

impl PartitionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve both partition names for `product_line`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` for a blank identifier or one containing
    /// characters outside `[A-Za-z0-9]`.
    pub fn resolve(&self, product_line: &str) -> Result<Partitions, StoreError> {
        let product_line = product_line.trim();
        if product_line.is_empty() {
            return Err(StoreError::InvalidInput(
                "product line is required".to_string(),
            ));
        }
        if !PRODUCT_LINE_PATTERN.is_match(product_line) {
            return Err(StoreError::InvalidInput(format!(
                "product line '{product_line}' contains characters outside [A-Za-z0-9]"
            )));
        }

        Ok(Partitions {
            product_line: product_line.to_string(),
            rma: PartitionName(format!("{product_line}{RMA_SUFFIX}")),
            stock: PartitionName(format!("{product_line}{STOCK_SUFFIX}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_names() {
        let partitions = PartitionResolver::new().resolve("VGA").unwrap();
        assert_eq!(partitions.product_line(), "VGA");
        assert_eq!(partitions.rma().as_str(), "VGA_RMA_record");
        assert_eq!(partitions.stock().as_str(), "VGA_buffer_stock");
        assert_eq!(partitions.for_kind(EntityKind::Stock), partitions.stock());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let resolver = PartitionResolver::new();
        assert_eq!(resolver.resolve("MiniPC").unwrap(), resolver.resolve("MiniPC").unwrap());
    }

    #[test]
    fn test_resolve_rejects_blank() {
        for input in ["", "   ", "\t"] {
            let err = PartitionResolver::new().resolve(input).unwrap_err();
            assert!(err.is_invalid_input(), "{input:?}");
        }
    }

    #[test]
    fn test_resolve_rejects_injection_shapes() {
        for input in ["VGA; DROP TABLE x", "VGA\"", "../MB", "MB_RMA_record x"] {
            assert!(PartitionResolver::new().resolve(input).is_err(), "{input:?}");
        }
    }
}
