//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_transactions_total` - Committed transactions by kind
//! - `ledger_transactions_failed_total` - Transactions driven to failed
//! - `ledger_operation_duration_seconds` - Histogram of operation latencies
//! - `ledger_cache_hits_total` / `ledger_cache_misses_total` - Wallet cache
//! - `ledger_wallets_created_total` - Wallets created

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transactions, labeled by kind
    pub transactions_total: IntCounterVec,

    /// Transactions that reached the failed state
    pub transactions_failed_total: IntCounter,

    /// Operation duration histogram
    pub operation_duration: Histogram,

    /// Wallet cache hits
    pub cache_hits_total: IntCounter,

    /// Wallet cache misses
    pub cache_misses_total: IntCounter,

    /// Wallets created
    pub wallets_created_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new(
                "ledger_transactions_total",
                "Committed transactions by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let transactions_failed_total = IntCounter::new(
            "ledger_transactions_failed_total",
            "Transactions driven to the failed state",
        )?;
        registry.register(Box::new(transactions_failed_total.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of ledger operation latencies",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
            ]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let cache_hits_total =
            IntCounter::new("ledger_cache_hits_total", "Wallet cache hits")?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total =
            IntCounter::new("ledger_cache_misses_total", "Wallet cache misses")?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let wallets_created_total =
            IntCounter::new("ledger_wallets_created_total", "Wallets created")?;
        registry.register(Box::new(wallets_created_total.clone()))?;

        Ok(Self {
            transactions_total,
            transactions_failed_total,
            operation_duration,
            cache_hits_total,
            cache_misses_total,
            wallets_created_total,
            registry,
        })
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_count() {
        let metrics = Metrics::new().unwrap();

        metrics.transactions_total.with_label_values(&["deposit"]).inc();
        metrics.transactions_total.with_label_values(&["transfer"]).inc();
        metrics.cache_hits_total.inc();

        assert_eq!(
            metrics
                .transactions_total
                .with_label_values(&["deposit"])
                .get(),
            1
        );
        assert_eq!(metrics.cache_hits_total.get(), 1);

        // Each collector lands in the dedicated registry
        assert_eq!(metrics.registry.gather().len(), 6);
    }
}
