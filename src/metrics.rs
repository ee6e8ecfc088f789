//! Prometheus counters and tracing span helpers.
//!
//! Metrics live on a crate-owned registry so embedding applications decide whether
//! and how to expose them (`gather_text()` renders the text exposition format).

#[cfg(feature = "metrics")]
pub use prometheus_impl::*;

#[cfg(feature = "metrics")]
mod prometheus_impl {
    use once_cell::sync::Lazy;
    use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<RmaMetrics> = Lazy::new(RmaMetrics::init);

    pub struct RmaMetrics {
        pub registry: Registry,
        pub queries_total: IntCounter,
        pub query_errors_total: IntCounter,
        pub query_duration: Histogram,
        pub transactions_total: IntCounterVec,
        pub batch_runs_total: IntCounterVec,
    }

    impl RmaMetrics {
        pub fn init() -> Self {
            let registry = Registry::new_custom(Some("rmaguard".to_string()), None)
                .expect("static registry prefix is valid");

            let queries_total = IntCounter::new("queries_total", "Total statements executed")
                .expect("valid counter");
            let query_errors_total =
                IntCounter::new("query_errors_total", "Statements that returned an error")
                    .expect("valid counter");
            let query_duration = Histogram::with_opts(HistogramOpts::new(
                "query_duration_seconds",
                "Duration of statements",
            ))
            .expect("valid histogram");
            let transactions_total = IntCounterVec::new(
                Opts::new("transactions_total", "Finished transactions by outcome"),
                &["outcome"],
            )
            .expect("valid counter vec");
            let batch_runs_total = IntCounterVec::new(
                Opts::new("batch_runs_total", "Batch worker runs by outcome"),
                &["outcome"],
            )
            .expect("valid counter vec");

            for collector in [
                Box::new(queries_total.clone()) as Box<dyn prometheus::core::Collector>,
                Box::new(query_errors_total.clone()),
                Box::new(query_duration.clone()),
                Box::new(transactions_total.clone()),
                Box::new(batch_runs_total.clone()),
            ] {
                registry
                    .register(collector)
                    .expect("metric names are unique");
            }

            Self {
                registry,
                queries_total,
                query_errors_total,
                query_duration,
                transactions_total,
                batch_runs_total,
            }
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.queries_total.inc();
            self.query_duration.observe(elapsed.as_secs_f64());
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.inc();
        }

        pub fn record_transaction(&self, outcome: &str) {
            self.transactions_total.with_label_values(&[outcome]).inc();
        }

        pub fn record_batch_run(&self, outcome: &str) {
            self.batch_runs_total.with_label_values(&[outcome]).inc();
        }
    }

    /// Render every metric in the Prometheus text format.
    pub fn gather_text() -> String {
        let families = METRICS.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
            log::warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_counters_show_up_in_text_export() {
            METRICS.record_batch_run("completed");
            METRICS.record_transaction("committed");
            METRICS.record_query_duration(Duration::from_millis(3));
            let text = gather_text();
            assert!(text.contains("rmaguard_batch_runs_total"));
            assert!(text.contains("rmaguard_transactions_total"));
            assert!(text.contains("rmaguard_queries_total"));
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn execute_query_span(query: &str) -> Span {
        info_span!("execute_query", db.statement = %query)
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("acquire_connection")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("begin_transaction")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("commit_transaction")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("rollback_transaction")
    }

    pub fn batch_run_span(product_type: &str, run_id: &str) -> Span {
        info_span!("batch_run", product_type = %product_type, run_id = %run_id)
    }
}
