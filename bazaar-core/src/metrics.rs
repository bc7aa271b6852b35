//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the market ledger.
//!
//! # Metrics
//!
//! - `market_operations_total` - Successful mutating operations
//! - `market_rejections_total` - Operations rejected with a typed failure
//! - `market_orders_placed_total` - Orders placed (funds escrowed)
//! - `market_orders_shipped_total` - Orders shipped (escrow released)
//! - `market_withdrawals_total` - Withdrawals released externally
//! - `market_escrowed_funds` - Funds currently held in escrow
//! - `market_balance_funds` - Sum of all withdrawable balances

use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful mutating operations
    pub operations_total: IntCounter,

    /// Rejected operations
    pub rejections_total: IntCounter,

    /// Orders placed
    pub orders_placed_total: IntCounter,

    /// Orders shipped
    pub orders_shipped_total: IntCounter,

    /// Withdrawals released
    pub withdrawals_total: IntCounter,

    /// Funds currently escrowed
    pub escrowed_funds: IntGauge,

    /// Sum of withdrawable balances
    pub balance_funds: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounter::new(
            "market_operations_total",
            "Successful mutating operations",
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let rejections_total = IntCounter::new(
            "market_rejections_total",
            "Operations rejected with a typed failure",
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let orders_placed_total = IntCounter::new(
            "market_orders_placed_total",
            "Orders placed (funds escrowed)",
        )?;
        registry.register(Box::new(orders_placed_total.clone()))?;

        let orders_shipped_total = IntCounter::new(
            "market_orders_shipped_total",
            "Orders shipped (escrow released)",
        )?;
        registry.register(Box::new(orders_shipped_total.clone()))?;

        let withdrawals_total = IntCounter::new(
            "market_withdrawals_total",
            "Withdrawals released externally",
        )?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let escrowed_funds = IntGauge::new(
            "market_escrowed_funds",
            "Funds currently held in escrow",
        )?;
        registry.register(Box::new(escrowed_funds.clone()))?;

        let balance_funds = IntGauge::new(
            "market_balance_funds",
            "Sum of all withdrawable balances",
        )?;
        registry.register(Box::new(balance_funds.clone()))?;

        Ok(Self {
            operations_total,
            rejections_total,
            orders_placed_total,
            orders_shipped_total,
            withdrawals_total,
            escrowed_funds,
            balance_funds,
            registry,
        })
    }

    /// Record a successful mutating operation
    pub fn record_operation(&self) {
        self.operations_total.inc();
    }

    /// Record a rejected operation
    pub fn record_rejection(&self) {
        self.rejections_total.inc();
    }

    /// Record an order placement
    pub fn record_order_placed(&self) {
        self.orders_placed_total.inc();
    }

    /// Record an order shipment
    pub fn record_order_shipped(&self) {
        self.orders_shipped_total.inc();
    }

    /// Record a withdrawal
    pub fn record_withdrawal(&self) {
        self.withdrawals_total.inc();
    }

    /// Update the escrow and balance gauges
    pub fn set_funds(&self, escrowed: u64, balances: u64) {
        self.escrowed_funds.set(escrowed as i64);
        self.balance_funds.set(balances as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
