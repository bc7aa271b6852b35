//! Actor-based concurrency for the market
//!
//! This module implements the single-writer pattern using Tokio actors:
//! one logical writer task owns the state and the storage handle, so no
//! two operations ever interleave their reads and writes. External callers
//! may submit operations concurrently; the mailbox serializes them into a
//! total order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               MarketHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              MarketActor (Single Task)                │
//! │   validate → mutate MarketState → WriteBatch          │
//! │                       │                               │
//! │                       ▼                               │
//! │       broadcast::Sender<Notification>                 │
//! │      (exactly one per successful mutation)            │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::payout::Payout;
use crate::state::MarketState;
use crate::storage::Storage;
use crate::types::{
    AccountId, Amount, Change, ContactDetails, Notification, Order, OrderId, OrderRequest,
    Product, ProductSpec, ProspectiveMerchant, ShopperRegistration, Sku, Store, StoreId,
    StoreSpec, User, UserId,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Message sent to the market actor
pub enum MarketMessage {
    /// Register the administrator
    RegisterAdmin {
        /// Calling account
        account: AccountId,
        /// Allocated user id on success
        response: oneshot::Sender<Result<UserId>>,
    },

    /// Register a shopper with contact details
    RegisterShopper {
        /// Calling account
        account: AccountId,
        /// Registration request
        registration: ShopperRegistration,
        /// Allocated user id on success
        response: oneshot::Sender<Result<UserId>>,
    },

    /// Overwrite the caller's contact details
    UpdateContact {
        /// Calling account
        account: AccountId,
        /// New contact details
        details: ContactDetails,
        /// Completion
        response: oneshot::Sender<Result<()>>,
    },

    /// Queue a merchant status request
    RequestMerchantStatus {
        /// Calling account
        account: AccountId,
        /// Name supplied with the request
        name: String,
        /// Queue index at insertion
        response: oneshot::Sender<Result<usize>>,
    },

    /// Approve the pending request at an index
    ApproveMerchant {
        /// Calling (admin) account
        account: AccountId,
        /// Queue index
        index: usize,
        /// Completion
        response: oneshot::Sender<Result<()>>,
    },

    /// Reject the pending request at an index
    RejectMerchant {
        /// Calling (admin) account
        account: AccountId,
        /// Queue index
        index: usize,
        /// Completion
        response: oneshot::Sender<Result<()>>,
    },

    /// Open a store
    OpenStore {
        /// Calling (merchant) account
        account: AccountId,
        /// Store request
        spec: StoreSpec,
        /// Allocated store id on success
        response: oneshot::Sender<Result<StoreId>>,
    },

    /// Add a product to an owned store
    AddProduct {
        /// Calling (merchant) account
        account: AccountId,
        /// Target store
        store_id: StoreId,
        /// Product request
        spec: ProductSpec,
        /// Allocated sku on success
        response: oneshot::Sender<Result<Sku>>,
    },

    /// Edit a product in an owned store
    EditProduct {
        /// Calling (merchant) account
        account: AccountId,
        /// Target product
        sku: Sku,
        /// Replacement fields
        spec: ProductSpec,
        /// Completion
        response: oneshot::Sender<Result<()>>,
    },

    /// Place an order
    PlaceOrder {
        /// Buying account
        buyer: AccountId,
        /// Order request
        request: OrderRequest,
        /// Allocated per-seller order id on success
        response: oneshot::Sender<Result<OrderId>>,
    },

    /// Ship the pending order at an index
    ShipOrder {
        /// Selling account
        seller: AccountId,
        /// Pending list index
        index: usize,
        /// Amount credited on success
        response: oneshot::Sender<Result<Amount>>,
    },

    /// Withdraw from the caller's balance
    Withdraw {
        /// Calling account
        account: AccountId,
        /// Amount to release
        amount: Amount,
        /// Completion
        response: oneshot::Sender<Result<()>>,
    },

    /// Toggle the circuit breaker
    ToggleBreaker {
        /// Calling (admin) account
        account: AccountId,
        /// New breaker state on success
        response: oneshot::Sender<Result<bool>>,
    },

    /// Look up a user
    GetUser {
        /// Queried account
        account: AccountId,
        /// Projection
        response: oneshot::Sender<Option<User>>,
    },

    /// Look up contact details
    GetContact {
        /// Queried account
        account: AccountId,
        /// Projection
        response: oneshot::Sender<Option<ContactDetails>>,
    },

    /// Pending merchant queue snapshot
    GetProspectiveMerchants {
        /// Projection
        response: oneshot::Sender<Vec<ProspectiveMerchant>>,
    },

    /// Pending merchant queue length
    GetProspectiveMerchantCount {
        /// Projection
        response: oneshot::Sender<usize>,
    },

    /// Look up a store
    GetStore {
        /// Queried store
        store_id: StoreId,
        /// Projection
        response: oneshot::Sender<Option<Store>>,
    },

    /// Ordered owned-store ids for an account
    GetStoresOwned {
        /// Queried account
        account: AccountId,
        /// Projection
        response: oneshot::Sender<Vec<StoreId>>,
    },

    /// Look up a product
    GetProduct {
        /// Queried sku
        sku: Sku,
        /// Projection
        response: oneshot::Sender<Option<Product>>,
    },

    /// Pending order by seller and index
    GetPendingOrder {
        /// Selling account
        seller: AccountId,
        /// Pending list index
        index: usize,
        /// Projection
        response: oneshot::Sender<Option<Order>>,
    },

    /// Pending order count for a seller
    GetOrderCount {
        /// Selling account
        seller: AccountId,
        /// Projection
        response: oneshot::Sender<usize>,
    },

    /// Circuit breaker state
    GetBreakerActive {
        /// Projection
        response: oneshot::Sender<bool>,
    },

    /// Shutdown actor
    Shutdown {
        /// Acked after the storage handle is released
        response: oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for MarketMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketMessage").finish_non_exhaustive()
    }
}

/// Actor that processes market messages
pub struct MarketActor {
    /// Authoritative in-memory state
    state: MarketState,

    /// Storage backend
    storage: Arc<Storage>,

    /// External fund-release collaborator
    payout: Box<dyn Payout>,

    /// Metrics collector
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<MarketMessage>,

    /// Change notification fan-out
    notifier: broadcast::Sender<Notification>,
}

impl MarketActor {
    /// Create new actor
    pub fn new(
        state: MarketState,
        storage: Arc<Storage>,
        payout: Box<dyn Payout>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<MarketMessage>,
        notifier: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            state,
            storage,
            payout,
            metrics,
            mailbox,
            notifier,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let ack = loop {
            match self.mailbox.recv().await {
                Some(MarketMessage::Shutdown { response }) => break Some(response),
                Some(msg) => self.handle_message(msg),
                None => break None,
            }
        };

        // Release the storage handle (and its file lock) before acking,
        // so the same data directory can be reopened immediately.
        drop(self.storage);
        if let Some(response) = ack {
            let _ = response.send(());
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: MarketMessage) {
        match msg {
            MarketMessage::RegisterAdmin { account, response } => {
                self.mutate(response, |state, _| state.register_admin(&account), |change| {
                    match change {
                        Change::AdminRegistered { user_id, .. } => *user_id,
                        _ => unreachable!(),
                    }
                });
            }

            MarketMessage::RegisterShopper {
                account,
                registration,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.register_shopper(&account, registration),
                    |change| match change {
                        Change::ShopperRegistered { user_id, .. } => *user_id,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::UpdateContact {
                account,
                details,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.update_contact(&account, details),
                    |_| (),
                );
            }

            MarketMessage::RequestMerchantStatus {
                account,
                name,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.request_merchant_status(&account, name),
                    |change| match change {
                        Change::MerchantRequested { index, .. } => *index,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::ApproveMerchant {
                account,
                index,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.approve_merchant(&account, index),
                    |_| (),
                );
            }

            MarketMessage::RejectMerchant {
                account,
                index,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.reject_merchant(&account, index),
                    |_| (),
                );
            }

            MarketMessage::OpenStore {
                account,
                spec,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.open_store(&account, spec),
                    |change| match change {
                        Change::StoreOpened { store_id, .. } => *store_id,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::AddProduct {
                account,
                store_id,
                spec,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.add_product(&account, store_id, spec),
                    |change| match change {
                        Change::ProductAdded { sku, .. } => *sku,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::EditProduct {
                account,
                sku,
                spec,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.edit_product(&account, sku, spec),
                    |_| (),
                );
            }

            MarketMessage::PlaceOrder {
                buyer,
                request,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.place_order(&buyer, request),
                    |change| match change {
                        Change::OrderPlaced { order_id, .. } => *order_id,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::ShipOrder {
                seller,
                index,
                response,
            } => {
                self.mutate(
                    response,
                    |state, _| state.ship_order(&seller, index),
                    |change| match change {
                        Change::OrderShipped { total_price, .. } => *total_price,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::Withdraw {
                account,
                amount,
                response,
            } => {
                self.mutate(
                    response,
                    |state, payout| state.withdraw(&account, amount, payout),
                    |_| (),
                );
            }

            MarketMessage::ToggleBreaker { account, response } => {
                self.mutate(
                    response,
                    |state, _| state.toggle_breaker(&account),
                    |change| match change {
                        Change::BreakerToggled { active } => *active,
                        _ => unreachable!(),
                    },
                );
            }

            MarketMessage::GetUser { account, response } => {
                let _ = response.send(self.state.user(&account).cloned());
            }

            MarketMessage::GetContact { account, response } => {
                let _ = response.send(self.state.contact(&account).cloned());
            }

            MarketMessage::GetProspectiveMerchants { response } => {
                let _ = response.send(self.state.prospective_merchants().to_vec());
            }

            MarketMessage::GetProspectiveMerchantCount { response } => {
                let _ = response.send(self.state.prospective_merchant_count());
            }

            MarketMessage::GetStore { store_id, response } => {
                let _ = response.send(self.state.store(store_id).cloned());
            }

            MarketMessage::GetStoresOwned { account, response } => {
                let _ = response.send(self.state.stores_owned(&account).to_vec());
            }

            MarketMessage::GetProduct { sku, response } => {
                let _ = response.send(self.state.product(sku).cloned());
            }

            MarketMessage::GetPendingOrder {
                seller,
                index,
                response,
            } => {
                let _ = response.send(self.state.pending_order(&seller, index).cloned());
            }

            MarketMessage::GetOrderCount { seller, response } => {
                let _ = response.send(self.state.order_count(&seller));
            }

            MarketMessage::GetBreakerActive { response } => {
                let _ = response.send(self.state.breaker_active());
            }

            MarketMessage::Shutdown { .. } => {
                // Handled in the run loop
            }
        }
    }

    /// Apply one mutating operation end to end
    ///
    /// Validate-and-mutate in memory, persist atomically, then notify.
    /// A rejected operation touches nothing; a failed persist reloads the
    /// in-memory state from disk so the two never diverge.
    fn mutate<T>(
        &mut self,
        response: oneshot::Sender<Result<T>>,
        op: impl FnOnce(&mut MarketState, &dyn Payout) -> Result<Change>,
        project: impl FnOnce(&Change) -> T,
    ) {
        let result = match op(&mut self.state, self.payout.as_ref()) {
            Ok(change) => match self.storage.apply(&self.state, &change) {
                Ok(()) => {
                    self.record(&change);
                    let value = project(&change);
                    let _ = self.notifier.send(Notification::new(change));
                    Ok(value)
                }
                Err(e) => {
                    tracing::error!("persist failed, reloading state: {}", e);
                    match self.storage.load_state() {
                        Ok(state) => self.state = state,
                        Err(reload) => {
                            tracing::error!("state reload failed: {}", reload);
                        }
                    }
                    Err(e)
                }
            },
            Err(e) => {
                self.metrics.record_rejection();
                Err(e)
            }
        };

        let _ = response.send(result);
    }

    fn record(&self, change: &Change) {
        self.metrics.record_operation();
        match change {
            Change::OrderPlaced { .. } => self.metrics.record_order_placed(),
            Change::OrderShipped { .. } => self.metrics.record_order_shipped(),
            Change::WithdrawalMade { .. } => self.metrics.record_withdrawal(),
            _ => {}
        }
        self.metrics
            .set_funds(self.state.escrowed_total(), self.state.balance_total());
    }
}

impl std::fmt::Debug for MarketActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketActor").finish_non_exhaustive()
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct MarketHandle {
    sender: mpsc::Sender<MarketMessage>,
}

impl MarketHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<MarketMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MarketMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("response channel closed".to_string()))
    }

    /// Register the administrator
    pub async fn register_admin(&self, account: AccountId) -> Result<UserId> {
        self.call(|response| MarketMessage::RegisterAdmin { account, response })
            .await?
    }

    /// Register a shopper with contact details
    pub async fn register_shopper(
        &self,
        account: AccountId,
        registration: ShopperRegistration,
    ) -> Result<UserId> {
        self.call(|response| MarketMessage::RegisterShopper {
            account,
            registration,
            response,
        })
        .await?
    }

    /// Overwrite the caller's contact details
    pub async fn update_contact(&self, account: AccountId, details: ContactDetails) -> Result<()> {
        self.call(|response| MarketMessage::UpdateContact {
            account,
            details,
            response,
        })
        .await?
    }

    /// Queue a merchant status request; returns the insertion index
    pub async fn request_merchant_status(&self, account: AccountId, name: String) -> Result<usize> {
        self.call(|response| MarketMessage::RequestMerchantStatus {
            account,
            name,
            response,
        })
        .await?
    }

    /// Approve the pending request at `index`
    pub async fn approve_merchant(&self, account: AccountId, index: usize) -> Result<()> {
        self.call(|response| MarketMessage::ApproveMerchant {
            account,
            index,
            response,
        })
        .await?
    }

    /// Reject the pending request at `index`
    pub async fn reject_merchant(&self, account: AccountId, index: usize) -> Result<()> {
        self.call(|response| MarketMessage::RejectMerchant {
            account,
            index,
            response,
        })
        .await?
    }

    /// Open a store; returns the allocated store id
    pub async fn open_store(&self, account: AccountId, spec: StoreSpec) -> Result<StoreId> {
        self.call(|response| MarketMessage::OpenStore {
            account,
            spec,
            response,
        })
        .await?
    }

    /// Add a product; returns the allocated sku
    pub async fn add_product(
        &self,
        account: AccountId,
        store_id: StoreId,
        spec: ProductSpec,
    ) -> Result<Sku> {
        self.call(|response| MarketMessage::AddProduct {
            account,
            store_id,
            spec,
            response,
        })
        .await?
    }

    /// Edit a product
    pub async fn edit_product(&self, account: AccountId, sku: Sku, spec: ProductSpec) -> Result<()> {
        self.call(|response| MarketMessage::EditProduct {
            account,
            sku,
            spec,
            response,
        })
        .await?
    }

    /// Place an order; returns the allocated per-seller order id
    pub async fn place_order(&self, buyer: AccountId, request: OrderRequest) -> Result<OrderId> {
        self.call(|response| MarketMessage::PlaceOrder {
            buyer,
            request,
            response,
        })
        .await?
    }

    /// Ship a pending order; returns the amount credited
    pub async fn ship_order(&self, seller: AccountId, index: usize) -> Result<Amount> {
        self.call(|response| MarketMessage::ShipOrder {
            seller,
            index,
            response,
        })
        .await?
    }

    /// Withdraw from the caller's balance
    pub async fn withdraw(&self, account: AccountId, amount: Amount) -> Result<()> {
        self.call(|response| MarketMessage::Withdraw {
            account,
            amount,
            response,
        })
        .await?
    }

    /// Toggle the circuit breaker; returns the new state
    pub async fn toggle_breaker(&self, account: AccountId) -> Result<bool> {
        self.call(|response| MarketMessage::ToggleBreaker { account, response })
            .await?
    }

    /// Look up a user
    pub async fn get_user(&self, account: AccountId) -> Result<Option<User>> {
        self.call(|response| MarketMessage::GetUser { account, response })
            .await
    }

    /// Look up contact details
    pub async fn get_contact(&self, account: AccountId) -> Result<Option<ContactDetails>> {
        self.call(|response| MarketMessage::GetContact { account, response })
            .await
    }

    /// Pending merchant queue snapshot
    pub async fn prospective_merchants(&self) -> Result<Vec<ProspectiveMerchant>> {
        self.call(|response| MarketMessage::GetProspectiveMerchants { response })
            .await
    }

    /// Pending merchant queue length
    pub async fn prospective_merchant_count(&self) -> Result<usize> {
        self.call(|response| MarketMessage::GetProspectiveMerchantCount { response })
            .await
    }

    /// Look up a store
    pub async fn get_store(&self, store_id: StoreId) -> Result<Option<Store>> {
        self.call(|response| MarketMessage::GetStore { store_id, response })
            .await
    }

    /// Ordered owned-store ids for an account
    pub async fn stores_owned(&self, account: AccountId) -> Result<Vec<StoreId>> {
        self.call(|response| MarketMessage::GetStoresOwned { account, response })
            .await
    }

    /// Look up a product
    pub async fn get_product(&self, sku: Sku) -> Result<Option<Product>> {
        self.call(|response| MarketMessage::GetProduct { sku, response })
            .await
    }

    /// Pending order by seller and index
    pub async fn pending_order(&self, seller: AccountId, index: usize) -> Result<Option<Order>> {
        self.call(|response| MarketMessage::GetPendingOrder {
            seller,
            index,
            response,
        })
        .await
    }

    /// Pending order count for a seller
    pub async fn order_count(&self, seller: AccountId) -> Result<usize> {
        self.call(|response| MarketMessage::GetOrderCount { seller, response })
            .await
    }

    /// Circuit breaker state
    pub async fn breaker_active(&self) -> Result<bool> {
        self.call(|response| MarketMessage::GetBreakerActive { response })
            .await
    }

    /// Shutdown actor, waiting for the storage handle to be released
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MarketMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::Concurrency("actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("response channel closed".to_string()))
    }
}

/// Spawn the market actor
pub fn spawn_market_actor(
    state: MarketState,
    storage: Arc<Storage>,
    payout: Box<dyn Payout>,
    metrics: Metrics,
    notify_capacity: usize,
) -> (MarketHandle, broadcast::Sender<Notification>) {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let (notify_tx, _) = broadcast::channel(notify_capacity);
    let actor = MarketActor::new(state, storage, payout, metrics, rx, notify_tx.clone());

    tokio::spawn(async move {
        actor.run().await;
    });

    (MarketHandle::new(tx), notify_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::NoopPayout;
    use crate::Config;

    fn spawn_temp() -> (MarketHandle, broadcast::Sender<Notification>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let state = storage.load_state().unwrap();
        let metrics = Metrics::new().unwrap();
        let (handle, notifier) =
            spawn_market_actor(state, storage, Box::new(NoopPayout), metrics, 64);
        (handle, notifier, temp_dir)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _notifier, _dir) = spawn_temp();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_serializes_operations() {
        let (handle, _notifier, _dir) = spawn_temp();

        let user_id = handle
            .register_admin(AccountId::new("0xadmin"))
            .await
            .unwrap();
        assert_eq!(user_id, 1);

        let user = handle.get_user(AccountId::new("0xadmin")).await.unwrap();
        assert_eq!(user.unwrap().user_id, 1);

        // A second registration is rejected with the typed failure.
        let err = handle
            .register_admin(AccountId::new("0xother"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleConflict(_)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_emits_one_notification_per_mutation() {
        let (handle, notifier, _dir) = spawn_temp();
        let mut rx = notifier.subscribe();

        handle
            .register_admin(AccountId::new("0xadmin"))
            .await
            .unwrap();

        let notification = rx.recv().await.unwrap();
        assert!(matches!(
            notification.change,
            Change::AdminRegistered { user_id: 1, .. }
        ));

        // Failed operations emit nothing.
        let _ = handle.register_admin(AccountId::new("0xother")).await;
        handle.shutdown().await.unwrap();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed | broadcast::error::TryRecvError::Empty)
        ));
    }
}
