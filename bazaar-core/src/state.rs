//! The authorization-and-settlement state machine
//!
//! This module is the core of the ledger: every rule about who may register
//! which role, how stores and products are owned, how orders escrow funds
//! and how withdrawals debit balances lives here, as synchronous
//! validate-then-mutate methods on [`MarketState`].
//!
//! Each method either applies its full state transition and returns the
//! [`Change`] it produced, or fails with a typed error and leaves the state
//! untouched. Ordering and atomicity are supplied by the single-writer
//! actor that owns the state; nothing here blocks or suspends.
//!
//! # Invariants
//!
//! - At most one user ever holds the Admin role
//! - Roles never demote
//! - Product stock never goes negative
//! - Conservation: Σ(pending order totals) + Σ(balances)
//!   == Σ(accepted payments) − Σ(released withdrawals)

use crate::error::{Error, Result};
use crate::payout::Payout;
use crate::types::{
    AccountId, Amount, Change, ContactDetails, Order, OrderId, OrderRequest, Product, ProductSpec,
    ProspectiveMerchant, Role, ShopperRegistration, Sku, Store, StoreId, StoreSpec, User, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved display name assigned at administrator registration
pub const ADMIN_DISPLAY_NAME: &str = "Bazaar Administrator";

/// Counters, breaker flag and conservation totals
///
/// Persisted as a single unit alongside the entity maps; every id sequence
/// starts at 1 and is owned by exactly one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Next user id (identity registry)
    pub next_user_id: UserId,

    /// Next store id (catalog manager)
    pub next_store_id: StoreId,

    /// Next sku (catalog manager, global)
    pub next_sku: Sku,

    /// Circuit breaker flag
    pub halted: bool,

    /// Sum of all payments ever accepted by order placement
    pub total_accepted: Amount,

    /// Sum of all funds ever released by withdrawal
    pub total_released: Amount,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            next_user_id: 1,
            next_store_id: 1,
            next_sku: 1,
            halted: false,
            total_accepted: 0,
            total_released: 0,
        }
    }
}

/// In-memory marketplace state, exclusively owned by the single writer
#[derive(Debug, Default)]
pub struct MarketState {
    /// Registered users by account
    users: HashMap<AccountId, User>,

    /// Contact details by account
    contacts: HashMap<AccountId, ContactDetails>,

    /// Pending merchant requests, append-ordered; removal compacts
    queue: Vec<ProspectiveMerchant>,

    /// Stores by id
    stores: HashMap<StoreId, Store>,

    /// Ordered owned-store lists by merchant account
    registry: HashMap<AccountId, Vec<StoreId>>,

    /// Products by sku
    products: HashMap<Sku, Product>,

    /// Pending order lists by seller account; removal compacts
    orders: HashMap<AccountId, Vec<Order>>,

    /// Counters, breaker, conservation totals
    meta: Meta,
}

impl MarketState {
    /// Empty market with fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble state from persisted parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        users: HashMap<AccountId, User>,
        contacts: HashMap<AccountId, ContactDetails>,
        queue: Vec<ProspectiveMerchant>,
        stores: HashMap<StoreId, Store>,
        registry: HashMap<AccountId, Vec<StoreId>>,
        products: HashMap<Sku, Product>,
        orders: HashMap<AccountId, Vec<Order>>,
        meta: Meta,
    ) -> Self {
        Self {
            users,
            contacts,
            queue,
            stores,
            registry,
            products,
            orders,
            meta,
        }
    }

    // ---- Identity & role registry ----

    /// Register the marketplace administrator
    ///
    /// Succeeds only while no admin exists. An unregistered caller gets a
    /// fresh user entry; a registered shopper is upgraded in place. Either
    /// way the display name is fixed to [`ADMIN_DISPLAY_NAME`].
    pub fn register_admin(&mut self, caller: &AccountId) -> Result<Change> {
        self.ensure_active()?;

        if self.users.values().any(|u| u.role == Role::Admin) {
            return Err(Error::RoleConflict(
                "an administrator is already registered".to_string(),
            ));
        }

        if let Some(user) = self.users.get_mut(caller) {
            if user.role != Role::Shopper {
                return Err(Error::Unauthorized(
                    "merchants cannot claim the administrator role".to_string(),
                ));
            }
            user.role = Role::Admin;
            user.name = ADMIN_DISPLAY_NAME.to_string();
            let user_id = user.user_id;
            return Ok(Change::AdminRegistered {
                account: caller.clone(),
                user_id,
            });
        }

        let user_id = self.allocate_user_id();
        self.users.insert(
            caller.clone(),
            User {
                user_id,
                name: ADMIN_DISPLAY_NAME.to_string(),
                role: Role::Admin,
                balance: 0,
            },
        );

        Ok(Change::AdminRegistered {
            account: caller.clone(),
            user_id,
        })
    }

    /// Register a shopper with their contact details
    pub fn register_shopper(
        &mut self,
        caller: &AccountId,
        registration: ShopperRegistration,
    ) -> Result<Change> {
        self.ensure_active()?;

        if self.users.contains_key(caller) {
            return Err(Error::DuplicateRegistration(format!(
                "account {caller} is already registered"
            )));
        }

        let user_id = self.allocate_user_id();
        self.users.insert(
            caller.clone(),
            User {
                user_id,
                name: registration.name,
                role: Role::Shopper,
                balance: 0,
            },
        );
        self.contacts.insert(caller.clone(), registration.contact);

        Ok(Change::ShopperRegistered {
            account: caller.clone(),
            user_id,
        })
    }

    /// Look up a registered user; absence is a valid outcome
    pub fn user(&self, account: &AccountId) -> Option<&User> {
        self.users.get(account)
    }

    // ---- Contact directory ----

    /// Overwrite the caller's own contact details
    pub fn update_contact(&mut self, caller: &AccountId, details: ContactDetails) -> Result<Change> {
        self.ensure_active()?;

        if !self.users.contains_key(caller) {
            return Err(Error::NotFound(format!(
                "account {caller} is not registered"
            )));
        }
        self.contacts.insert(caller.clone(), details);

        Ok(Change::ContactUpdated {
            account: caller.clone(),
        })
    }

    /// Look up contact details by account
    pub fn contact(&self, account: &AccountId) -> Option<&ContactDetails> {
        self.contacts.get(account)
    }

    // ---- Merchant approval workflow ----

    /// Queue a shopper's request for merchant status
    ///
    /// Returns the stable insertion index. Earlier removals shift later
    /// indices down, so callers must re-fetch the count before indexing.
    pub fn request_merchant_status(&mut self, caller: &AccountId, name: String) -> Result<Change> {
        self.ensure_active()?;

        let user = self.users.get(caller).ok_or_else(|| {
            Error::Unauthorized("only registered shoppers may request merchant status".to_string())
        })?;
        if user.role != Role::Shopper {
            return Err(Error::Unauthorized(format!(
                "account {caller} already holds the {} role",
                user.role
            )));
        }
        let user_id = user.user_id;

        if self.queue.iter().any(|p| p.user_id == user_id) {
            return Err(Error::DuplicateRegistration(format!(
                "a merchant request for account {caller} is already pending"
            )));
        }

        let index = self.queue.len();
        self.queue.push(ProspectiveMerchant {
            account: caller.clone(),
            user_id,
            name,
        });

        Ok(Change::MerchantRequested {
            account: caller.clone(),
            user_id,
            index,
        })
    }

    /// Promote the queued request at `index` to merchant
    pub fn approve_merchant(&mut self, caller: &AccountId, index: usize) -> Result<Change> {
        self.ensure_active()?;
        self.require_admin(caller)?;

        let entry = self.take_queued(index)?;
        let user = self.users.get_mut(&entry.account).ok_or_else(|| {
            Error::InvariantViolation(format!("queued account {} has no user entry", entry.account))
        })?;
        user.role = Role::Merchant;

        Ok(Change::MerchantApproved {
            account: entry.account,
            user_id: entry.user_id,
        })
    }

    /// Remove the queued request at `index` without a role change
    pub fn reject_merchant(&mut self, caller: &AccountId, index: usize) -> Result<Change> {
        self.ensure_active()?;
        self.require_admin(caller)?;

        let entry = self.take_queued(index)?;

        Ok(Change::MerchantRejected {
            account: entry.account,
            user_id: entry.user_id,
        })
    }

    /// Pending merchant requests in queue order
    pub fn prospective_merchants(&self) -> &[ProspectiveMerchant] {
        &self.queue
    }

    /// Number of pending merchant requests
    pub fn prospective_merchant_count(&self) -> usize {
        self.queue.len()
    }

    // ---- Store & catalog manager ----

    /// Open a store owned by the calling merchant
    pub fn open_store(&mut self, caller: &AccountId, spec: StoreSpec) -> Result<Change> {
        self.ensure_active()?;

        let is_merchant = self
            .users
            .get(caller)
            .map(|u| u.role == Role::Merchant)
            .unwrap_or(false);
        if !is_merchant {
            return Err(Error::Unauthorized(
                "merchant role required to open a store".to_string(),
            ));
        }

        let store_id = self.allocate_store_id();
        self.stores.insert(
            store_id,
            Store {
                store_id,
                owner: caller.clone(),
                title: spec.title,
                description: spec.description,
            },
        );
        self.registry
            .entry(caller.clone())
            .or_default()
            .push(store_id);

        Ok(Change::StoreOpened {
            owner: caller.clone(),
            store_id,
        })
    }

    /// Add a product to a store owned by the caller
    pub fn add_product(
        &mut self,
        caller: &AccountId,
        store_id: StoreId,
        spec: ProductSpec,
    ) -> Result<Change> {
        self.ensure_active()?;
        self.require_store_owner(caller, store_id)?;

        let sku = self.allocate_sku();
        self.products.insert(
            sku,
            Product {
                sku,
                store_id,
                title: spec.title,
                description: spec.description,
                price: spec.price,
                shipping_price: spec.shipping_price,
                image: spec.image,
                quantity: spec.quantity,
            },
        );

        Ok(Change::ProductAdded { store_id, sku })
    }

    /// Overwrite the mutable fields of a product owned by the caller
    ///
    /// `sku` and `store_id` are immutable.
    pub fn edit_product(&mut self, caller: &AccountId, sku: Sku, spec: ProductSpec) -> Result<Change> {
        self.ensure_active()?;

        let store_id = self
            .products
            .get(&sku)
            .map(|p| p.store_id)
            .ok_or_else(|| Error::NotFound(format!("no product with sku {sku}")))?;
        self.require_store_owner(caller, store_id)?;

        let product = self
            .products
            .get_mut(&sku)
            .ok_or_else(|| Error::NotFound(format!("no product with sku {sku}")))?;
        product.title = spec.title;
        product.description = spec.description;
        product.price = spec.price;
        product.shipping_price = spec.shipping_price;
        product.image = spec.image;
        product.quantity = spec.quantity;

        Ok(Change::ProductEdited { sku })
    }

    /// Look up a store by id
    pub fn store(&self, store_id: StoreId) -> Option<&Store> {
        self.stores.get(&store_id)
    }

    /// Ordered store ids owned by an account
    pub fn stores_owned(&self, account: &AccountId) -> &[StoreId] {
        self.registry.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of stores owned by an account
    pub fn store_count_owned(&self, account: &AccountId) -> usize {
        self.stores_owned(account).len()
    }

    /// Look up a product by sku
    pub fn product(&self, sku: Sku) -> Option<&Product> {
        self.products.get(&sku)
    }

    // ---- Order & escrow ledger ----

    /// Place an order: reserve stock, escrow the payment
    ///
    /// The payment must equal the order total exactly. Stock is decremented
    /// immediately; the funds are held by the ledger and only credited to
    /// the seller when the order ships. An unregistered buyer is
    /// materialized as an implicit shopper entry first.
    pub fn place_order(&mut self, buyer: &AccountId, request: OrderRequest) -> Result<Change> {
        self.ensure_active()?;

        let product = self
            .products
            .get(&request.sku)
            .ok_or_else(|| Error::NotFound(format!("no product with sku {}", request.sku)))?;

        if request.quantity == 0 || request.quantity > product.quantity {
            return Err(Error::InsufficientStock {
                requested: request.quantity,
                available: product.quantity,
            });
        }

        let total_price = product.order_total(request.quantity).ok_or_else(|| {
            Error::InvariantViolation("order total overflows the amount range".to_string())
        })?;
        if request.payment_amount != total_price {
            return Err(Error::PaymentMismatch {
                expected: total_price,
                got: request.payment_amount,
            });
        }

        let store_id = product.store_id;
        let seller = self
            .stores
            .get(&store_id)
            .map(|s| s.owner.clone())
            .ok_or_else(|| {
                Error::InvariantViolation(format!("product {} references missing store", request.sku))
            })?;
        let new_accepted = self
            .meta
            .total_accepted
            .checked_add(total_price)
            .ok_or_else(|| {
                Error::InvariantViolation("accepted payment total overflows".to_string())
            })?;

        // All preconditions hold; apply the full transition.
        if !self.users.contains_key(buyer) {
            let user_id = self.allocate_user_id();
            self.users.insert(
                buyer.clone(),
                User {
                    user_id,
                    name: String::new(),
                    role: Role::Shopper,
                    balance: 0,
                },
            );
        }

        if let Some(product) = self.products.get_mut(&request.sku) {
            product.quantity -= request.quantity;
        }

        let pending = self.orders.entry(seller.clone()).or_default();
        let order_id = pending.len() as OrderId + 1;
        pending.push(Order {
            order_id,
            sku: request.sku,
            store_id,
            buyer: buyer.clone(),
            seller: seller.clone(),
            quantity: request.quantity,
            total_price,
        });
        self.meta.total_accepted = new_accepted;

        Ok(Change::OrderPlaced {
            seller,
            buyer: buyer.clone(),
            order_id,
            sku: request.sku,
            total_price,
        })
    }

    /// Ship the pending order at `index`, releasing its escrow
    ///
    /// Only the seller addresses their own pending list, so ownership is
    /// implied by the key. The list compacts on removal: later indices
    /// shift down and callers must re-fetch the count.
    pub fn ship_order(&mut self, seller: &AccountId, index: usize) -> Result<Change> {
        self.ensure_active()?;

        let order = self
            .orders
            .get(seller)
            .and_then(|pending| pending.get(index))
            .ok_or_else(|| {
                Error::NotFound(format!("no pending order at index {index} for {seller}"))
            })?;
        let total_price = order.total_price;

        let balance = self
            .users
            .get(seller)
            .map(|u| u.balance)
            .ok_or_else(|| {
                Error::InvariantViolation(format!("seller {seller} has no user entry"))
            })?;
        let new_balance = balance.checked_add(total_price).ok_or_else(|| {
            Error::InvariantViolation("seller balance overflows".to_string())
        })?;

        let order = match self.orders.get_mut(seller) {
            Some(pending) => pending.remove(index),
            None => {
                return Err(Error::NotFound(format!(
                    "no pending order at index {index} for {seller}"
                )))
            }
        };
        if let Some(user) = self.users.get_mut(seller) {
            user.balance = new_balance;
        }

        Ok(Change::OrderShipped {
            seller: seller.clone(),
            order_id: order.order_id,
            total_price: order.total_price,
        })
    }

    /// Pending order by seller and index
    pub fn pending_order(&self, seller: &AccountId, index: usize) -> Option<&Order> {
        self.orders.get(seller).and_then(|pending| pending.get(index))
    }

    /// Number of pending orders for a seller
    pub fn order_count(&self, seller: &AccountId) -> usize {
        self.orders.get(seller).map(Vec::len).unwrap_or(0)
    }

    // ---- Withdrawal handler ----

    /// Withdraw from the caller's ledger balance through `payout`
    ///
    /// The debit and the external release are coupled: if the release
    /// fails, the debit is rolled back and the operation reports
    /// `ExternalReleaseFailed` with state unchanged.
    pub fn withdraw(
        &mut self,
        caller: &AccountId,
        amount: Amount,
        payout: &dyn Payout,
    ) -> Result<Change> {
        self.ensure_active()?;

        let new_released = self
            .meta
            .total_released
            .checked_add(amount)
            .ok_or_else(|| {
                Error::InvariantViolation("released withdrawal total overflows".to_string())
            })?;

        {
            let Some(user) = self.users.get_mut(caller) else {
                // An unregistered account has balance 0.
                return Err(Error::InsufficientBalance {
                    requested: amount,
                    available: 0,
                });
            };
            if amount > user.balance {
                return Err(Error::InsufficientBalance {
                    requested: amount,
                    available: user.balance,
                });
            }
            user.balance -= amount;
        }

        if let Err(e) = payout.release(caller, amount) {
            // Compensating rollback: the debit must not outlive a failed
            // external release.
            if let Some(user) = self.users.get_mut(caller) {
                user.balance += amount;
            }
            tracing::warn!("withdrawal rolled back for {}: {}", caller, e);
            return Err(Error::ExternalReleaseFailed(e.to_string()));
        }
        self.meta.total_released = new_released;

        Ok(Change::WithdrawalMade {
            account: caller.clone(),
            amount,
        })
    }

    // ---- Circuit breaker ----

    /// Flip the process-wide halt flag (admin only)
    ///
    /// Deliberately not gated by the flag itself: the admin must be able
    /// to un-halt.
    pub fn toggle_breaker(&mut self, caller: &AccountId) -> Result<Change> {
        self.require_admin(caller)?;
        self.meta.halted = !self.meta.halted;

        Ok(Change::BreakerToggled {
            active: self.meta.halted,
        })
    }

    /// Whether the circuit breaker is active
    pub fn breaker_active(&self) -> bool {
        self.meta.halted
    }

    // ---- Conservation & persistence views ----

    /// Counters, breaker and conservation totals
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Sum of all still-pending order totals (funds in escrow)
    pub fn escrowed_total(&self) -> Amount {
        self.orders
            .values()
            .flat_map(|pending| pending.iter())
            .map(|o| o.total_price)
            .sum()
    }

    /// Sum of all user balances
    pub fn balance_total(&self) -> Amount {
        self.users.values().map(|u| u.balance).sum()
    }

    /// Number of registered users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of open stores
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    /// Ordered owned-store list view for persistence
    pub fn registry_of(&self, account: &AccountId) -> Option<&Vec<StoreId>> {
        self.registry.get(account)
    }

    /// Pending order list view for persistence
    pub fn orders_of(&self, seller: &AccountId) -> Option<&Vec<Order>> {
        self.orders.get(seller)
    }

    // ---- Internal helpers ----

    fn ensure_active(&self) -> Result<()> {
        if self.meta.halted {
            return Err(Error::SystemHalted);
        }
        Ok(())
    }

    fn require_admin(&self, caller: &AccountId) -> Result<()> {
        match self.users.get(caller) {
            Some(user) if user.role == Role::Admin => Ok(()),
            _ => Err(Error::Unauthorized(
                "administrator role required".to_string(),
            )),
        }
    }

    fn require_store_owner(&self, caller: &AccountId, store_id: StoreId) -> Result<()> {
        let store = self
            .stores
            .get(&store_id)
            .ok_or_else(|| Error::NotFound(format!("no store with id {store_id}")))?;
        if &store.owner != caller {
            return Err(Error::Unauthorized(format!(
                "store {store_id} is not owned by {caller}"
            )));
        }
        Ok(())
    }

    fn take_queued(&mut self, index: usize) -> Result<ProspectiveMerchant> {
        if index >= self.queue.len() {
            return Err(Error::NotFound(format!(
                "no pending merchant request at index {index}"
            )));
        }
        Ok(self.queue.remove(index))
    }

    fn allocate_user_id(&mut self) -> UserId {
        let id = self.meta.next_user_id;
        self.meta.next_user_id += 1;
        id
    }

    fn allocate_store_id(&mut self) -> StoreId {
        let id = self.meta.next_store_id;
        self.meta.next_store_id += 1;
        id
    }

    fn allocate_sku(&mut self) -> Sku {
        let id = self.meta.next_sku;
        self.meta.next_sku += 1;
        id
    }
}
