//! Worker output parsing and the run report.

use super::{BatchError, BatchState};
use crate::service::{Operation, Outcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reconciliation counts for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub inserted: i64,
    pub updated: i64,
    pub total: i64,
    pub message: String,
}

/// The JSON object a worker prints on stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub success: bool,
    pub message: String,
    pub product_type: String,
    #[serde(default)]
    pub rma_stats: Option<BatchStats>,
    #[serde(default)]
    pub stock_stats: Option<BatchStats>,
}

/// Parse the worker report embedded in `stdout`.
///
/// The object spans from the first `{` to the last `}`; any text around it is
/// diagnostics and ignored.
///
/// # Errors
///
/// Returns `BatchError::Parse` if no brace pair is found, the slice is not valid JSON,
/// or a required key is missing.
pub fn extract_report(stdout: &str) -> Result<WorkerReport, BatchError> {
    let start = stdout
        .find('{')
        .ok_or_else(|| BatchError::Parse("no JSON object in worker output".to_string()))?;
    let end = stdout
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| BatchError::Parse("incomplete JSON object in worker output".to_string()))?;

    serde_json::from_str(&stdout[start..=end])
        .map_err(|e| BatchError::Parse(format!("invalid worker report: {e}")))
}

/// Result of one orchestrated run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: Uuid,
    pub product_type: String,
    pub success: bool,
    pub message: String,
    pub state: BatchState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rma_stats: Option<BatchStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_stats: Option<BatchStats>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub(crate) fn completed(run_id: Uuid, worker: WorkerReport, elapsed_ms: u64) -> Self {
        Self {
            run_id,
            product_type: worker.product_type,
            success: worker.success,
            message: worker.message,
            state: BatchState::Completed,
            rma_stats: worker.rma_stats,
            stock_stats: worker.stock_stats,
            elapsed_ms,
        }
    }

    pub(crate) fn failed(
        run_id: Uuid,
        product_type: &str,
        state: BatchState,
        error: &BatchError,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            run_id,
            product_type: product_type.to_string(),
            success: false,
            message: error.to_string(),
            state,
            rma_stats: None,
            stock_stats: None,
            elapsed_ms,
        }
    }

    /// Wrap as a `BATCH` outcome.
    pub fn into_outcome(self) -> Outcome<BatchReport> {
        let outcome = if self.success {
            Outcome::success(Operation::Batch, self.message.clone())
        } else {
            Outcome::failure(Operation::Batch, self.message.clone())
        };
        outcome
            .with_product_type(self.product_type.clone())
            .with_data(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{"success":true,"message":"done","productType":"VGA","rmaStats":{"inserted":3,"updated":2,"total":5,"message":"rma ok"},"stockStats":{"inserted":1,"updated":0,"total":1,"message":"stock ok"}}"#;

    #[test]
    fn test_report_surrounded_by_noise() {
        let stdout = format!("connecting...\nloaded sheet {{1}}? no\n{FULL}\nbye");
        // The first '{' is inside the noise, so this one is not parseable.
        assert!(matches!(extract_report(&stdout), Err(BatchError::Parse(_))));

        let stdout = format!("connecting...\n[info] 5 rows\n{FULL}\nclosing connection");
        let report = extract_report(&stdout).unwrap();
        assert!(report.success);
        assert_eq!(report.product_type, "VGA");
        assert_eq!(
            report.rma_stats,
            Some(BatchStats { inserted: 3, updated: 2, total: 5, message: "rma ok".to_string() })
        );
        assert_eq!(report.stock_stats.unwrap().total, 1);
    }

    #[test]
    fn test_stats_are_optional() {
        let report =
            extract_report(r#"{"success":false,"message":"no file","productType":"MB"}"#).unwrap();
        assert!(!report.success);
        assert!(report.rma_stats.is_none());
        assert!(report.stock_stats.is_none());
    }

    #[test]
    fn test_missing_braces() {
        assert!(matches!(extract_report("all good"), Err(BatchError::Parse(_))));
        assert!(matches!(extract_report("} before {"), Err(BatchError::Parse(_))));
        assert!(matches!(extract_report("{ never closed"), Err(BatchError::Parse(_))));
    }

    #[test]
    fn test_required_keys() {
        let missing_product = r#"{"success":true,"message":"x"}"#;
        assert!(matches!(extract_report(missing_product), Err(BatchError::Parse(_))));
        let partial_stats = r#"{"success":true,"message":"x","productType":"VGA","rmaStats":{"inserted":1}}"#;
        assert!(matches!(extract_report(partial_stats), Err(BatchError::Parse(_))));
    }

    #[test]
    fn test_outcome_wrapping() {
        let worker = extract_report(FULL).unwrap();
        let outcome = BatchReport::completed(Uuid::new_v4(), worker, 12).into_outcome();
        assert!(outcome.success);
        assert_eq!(outcome.operation, Operation::Batch);
        assert_eq!(outcome.product_type.as_deref(), Some("VGA"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["data"]["state"], "completed");
        assert_eq!(json["data"]["rmaStats"]["inserted"], 3);
    }
}
