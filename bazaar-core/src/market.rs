//! Public entry point for the marketplace ledger
//!
//! `Market` wires together storage, the single-writer actor, metrics and
//! the external payout collaborator, and exposes one typed async method
//! per operation. All mutations flow through the actor, so callers may
//! hold clones of `Market` across tasks without further synchronization.

use crate::actor::{spawn_market_actor, MarketHandle};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::payout::{NoopPayout, Payout};
use crate::storage::Storage;
use crate::types::{
    AccountId, Amount, ContactDetails, Notification, Order, OrderId, OrderRequest, Product,
    ProductSpec, ProspectiveMerchant, ShopperRegistration, Sku, Store, StoreId, StoreSpec, User,
    UserId,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Marketplace ledger service
#[derive(Clone)]
pub struct Market {
    /// Handle to the single-writer actor
    handle: MarketHandle,

    /// Change notification fan-out
    notifier: broadcast::Sender<Notification>,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Market {
    /// Open the market at the configured data directory
    ///
    /// Withdrawals are released through a no-op payout; use
    /// [`Market::open_with_payout`] to plug in a real one.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_payout(config, Box::new(NoopPayout)).await
    }

    /// Open the market with an external payout collaborator
    pub async fn open_with_payout(config: Config, payout: Box<dyn Payout>) -> Result<Self> {
        tracing::info!(data_dir = %config.data_dir.display(), "opening market");

        let storage = Arc::new(Storage::open(&config)?);
        let state = storage.load_state()?;
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {e}")))?;

        tracing::info!(
            users = state.user_count(),
            stores = state.store_count(),
            "state loaded"
        );

        let (handle, notifier) = spawn_market_actor(
            state,
            storage,
            payout,
            metrics.clone(),
            config.notifications.capacity,
        );

        Ok(Self {
            handle,
            notifier,
            metrics,
            config,
        })
    }

    /// Subscribe to change notifications
    ///
    /// Every successful mutation emits exactly one [`Notification`].
    /// Subscribers that lag past the configured capacity miss the oldest
    /// notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Register the administrator
    pub async fn register_admin(&self, account: AccountId) -> Result<UserId> {
        self.handle.register_admin(account).await
    }

    /// Register a shopper with contact details
    pub async fn register_shopper(
        &self,
        account: AccountId,
        registration: ShopperRegistration,
    ) -> Result<UserId> {
        self.handle.register_shopper(account, registration).await
    }

    /// Overwrite the caller's contact details
    pub async fn update_contact(&self, account: AccountId, details: ContactDetails) -> Result<()> {
        self.handle.update_contact(account, details).await
    }

    /// Queue a merchant status request; returns the insertion index
    pub async fn request_merchant_status(
        &self,
        account: AccountId,
        name: String,
    ) -> Result<usize> {
        self.handle.request_merchant_status(account, name).await
    }

    /// Approve the pending merchant request at `index` (admin only)
    pub async fn approve_merchant(&self, account: AccountId, index: usize) -> Result<()> {
        self.handle.approve_merchant(account, index).await
    }

    /// Reject the pending merchant request at `index` (admin only)
    pub async fn reject_merchant(&self, account: AccountId, index: usize) -> Result<()> {
        self.handle.reject_merchant(account, index).await
    }

    /// Open a store (merchant only); returns the allocated store id
    pub async fn open_store(&self, account: AccountId, spec: StoreSpec) -> Result<StoreId> {
        self.handle.open_store(account, spec).await
    }

    /// Add a product to an owned store; returns the allocated sku
    pub async fn add_product(
        &self,
        account: AccountId,
        store_id: StoreId,
        spec: ProductSpec,
    ) -> Result<Sku> {
        self.handle.add_product(account, store_id, spec).await
    }

    /// Edit a product in an owned store
    pub async fn edit_product(
        &self,
        account: AccountId,
        sku: Sku,
        spec: ProductSpec,
    ) -> Result<()> {
        self.handle.edit_product(account, sku, spec).await
    }

    /// Place an order, escrowing the payment; returns the per-seller order id
    pub async fn place_order(&self, buyer: AccountId, request: OrderRequest) -> Result<OrderId> {
        self.handle.place_order(buyer, request).await
    }

    /// Ship a pending order, crediting the escrowed total to the seller
    pub async fn ship_order(&self, seller: AccountId, index: usize) -> Result<Amount> {
        self.handle.ship_order(seller, index).await
    }

    /// Withdraw from the caller's balance through the payout collaborator
    pub async fn withdraw(&self, account: AccountId, amount: Amount) -> Result<()> {
        self.handle.withdraw(account, amount).await
    }

    /// Toggle the circuit breaker (admin only); returns the new state
    pub async fn toggle_breaker(&self, account: AccountId) -> Result<bool> {
        self.handle.toggle_breaker(account).await
    }

    /// Look up a user
    pub async fn get_user(&self, account: AccountId) -> Result<Option<User>> {
        self.handle.get_user(account).await
    }

    /// Look up contact details
    pub async fn get_contact(&self, account: AccountId) -> Result<Option<ContactDetails>> {
        self.handle.get_contact(account).await
    }

    /// Pending merchant queue snapshot
    pub async fn prospective_merchants(&self) -> Result<Vec<ProspectiveMerchant>> {
        self.handle.prospective_merchants().await
    }

    /// Pending merchant queue length
    pub async fn prospective_merchant_count(&self) -> Result<usize> {
        self.handle.prospective_merchant_count().await
    }

    /// Look up a store
    pub async fn get_store(&self, store_id: StoreId) -> Result<Option<Store>> {
        self.handle.get_store(store_id).await
    }

    /// Ordered owned-store ids for an account
    pub async fn stores_owned(&self, account: AccountId) -> Result<Vec<StoreId>> {
        self.handle.stores_owned(account).await
    }

    /// Number of stores owned by an account
    pub async fn store_count_owned(&self, account: AccountId) -> Result<usize> {
        Ok(self.handle.stores_owned(account).await?.len())
    }

    /// Look up a product
    pub async fn get_product(&self, sku: Sku) -> Result<Option<Product>> {
        self.handle.get_product(sku).await
    }

    /// Pending order by seller and index
    pub async fn pending_order(&self, seller: AccountId, index: usize) -> Result<Option<Order>> {
        self.handle.pending_order(seller, index).await
    }

    /// Pending order count for a seller
    pub async fn order_count(&self, seller: AccountId) -> Result<usize> {
        self.handle.order_count(seller).await
    }

    /// Circuit breaker state
    pub async fn breaker_active(&self) -> Result<bool> {
        self.handle.breaker_active().await
    }

    /// Get metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shut down the writer task
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down market");
        self.handle.shutdown().await
    }
}

impl std::fmt::Debug for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Market")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
