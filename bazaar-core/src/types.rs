//! Core types for the marketplace ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer smallest-currency-unit amounts)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Monetary amount in the smallest currency unit
pub type Amount = u64;

/// Sequential user identifier, allocated by the identity registry
pub type UserId = u64;

/// Sequential store identifier, allocated by the catalog manager
pub type StoreId = u64;

/// Globally unique sequential product identifier
pub type Sku = u64;

/// Per-seller sequential order identifier
pub type OrderId = u64;

/// Account identifier (external wallet/account key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role held by a registered account
///
/// Transitions only go up: Shopper to Merchant (via admin approval) or
/// Shopper to Admin (only while no admin exists). No path demotes a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    /// Marketplace administrator (at most one, ever)
    Admin = 0,
    /// Store owner
    Merchant = 1,
    /// Buyer (default role on registration)
    Shopper = 2,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Merchant => "merchant",
            Role::Shopper => "shopper",
        };
        write!(f, "{s}")
    }
}

/// Registered account entry
///
/// Owned exclusively by the identity registry; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Sequential id, unique per account
    pub user_id: UserId,

    /// Display name
    pub name: String,

    /// Current role
    pub role: Role,

    /// Withdrawable ledger balance
    pub balance: Amount,
}

/// Optional shipping/contact metadata, keyed 1:1 with an account
///
/// Used by the order settlement flow for shipment correlation only; the
/// ledger enforces nothing about its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    /// Shipping address
    pub address: String,

    /// Contact email
    pub email: String,

    /// Contact phone number
    pub phone: u64,
}

/// Pending role-upgrade request, queued for admin disposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProspectiveMerchant {
    /// Requesting account
    pub account: AccountId,

    /// User id of the requester
    pub user_id: UserId,

    /// Name supplied with the request
    pub name: String,
}

/// Store owned by a merchant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Sequential store id
    pub store_id: StoreId,

    /// Owning merchant (immutable after creation)
    pub owner: AccountId,

    /// Store title
    pub title: String,

    /// Store description
    pub description: String,
}

/// Catalog entry belonging to a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Globally unique sku
    pub sku: Sku,

    /// Owning store (immutable after creation)
    pub store_id: StoreId,

    /// Product title
    pub title: String,

    /// Product description
    pub description: String,

    /// Unit price
    pub price: Amount,

    /// Per-unit shipping price
    pub shipping_price: Amount,

    /// Image URL
    pub image: String,

    /// Stock on hand; decremented at order placement, never negative
    pub quantity: u64,
}

impl Product {
    /// Exact total an order of `quantity` units must pay
    ///
    /// Returns `None` on arithmetic overflow.
    pub fn order_total(&self, quantity: u64) -> Option<Amount> {
        self.price
            .checked_add(self.shipping_price)
            .and_then(|unit| unit.checked_mul(quantity))
    }
}

/// Escrowed order held in the seller's pending list
///
/// Created by `place_order`; leaves the list exactly once via `ship_order`,
/// at which point `total_price` is credited to the seller's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Per-seller sequential id (pending list length + 1 at placement)
    pub order_id: OrderId,

    /// Ordered product
    pub sku: Sku,

    /// Store the product belongs to
    pub store_id: StoreId,

    /// Buying account
    pub buyer: AccountId,

    /// Selling account (store owner at placement time)
    pub seller: AccountId,

    /// Units ordered
    pub quantity: u64,

    /// Escrowed funds: quantity x (price + shipping) at placement time
    pub total_price: Amount,
}

/// Named request structure for shopper registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopperRegistration {
    /// Display name
    pub name: String,

    /// Contact details recorded alongside the registration
    pub contact: ContactDetails,
}

/// Named request structure for opening a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSpec {
    /// Store title
    pub title: String,

    /// Store description
    pub description: String,
}

/// Named request structure for adding or editing a product
///
/// `sku` and `store_id` are never part of the request: both are immutable
/// and addressed separately by the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// Product title
    pub title: String,

    /// Product description
    pub description: String,

    /// Unit price
    pub price: Amount,

    /// Per-unit shipping price
    pub shipping_price: Amount,

    /// Image URL
    pub image: String,

    /// Stock on hand
    pub quantity: u64,
}

/// Named request structure for placing an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Product to order
    pub sku: Sku,

    /// Units requested (must be positive and within stock)
    pub quantity: u64,

    /// Funds attached; must equal the exact order total
    pub payment_amount: Amount,
}

/// State change produced by a successful mutating operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// The administrator registered
    AdminRegistered {
        /// Admin account
        account: AccountId,
        /// Allocated user id
        user_id: UserId,
    },
    /// A shopper registered with contact details
    ShopperRegistered {
        /// Shopper account
        account: AccountId,
        /// Allocated user id
        user_id: UserId,
    },
    /// An account overwrote its own contact details
    ContactUpdated {
        /// Owning account
        account: AccountId,
    },
    /// A shopper requested merchant status
    MerchantRequested {
        /// Requesting account
        account: AccountId,
        /// Requester user id
        user_id: UserId,
        /// Queue index at insertion
        index: usize,
    },
    /// Admin approved a pending request; the user is now a merchant
    MerchantApproved {
        /// Promoted account
        account: AccountId,
        /// Promoted user id
        user_id: UserId,
    },
    /// Admin rejected a pending request; no role change
    MerchantRejected {
        /// Rejected account
        account: AccountId,
        /// Rejected user id
        user_id: UserId,
    },
    /// A merchant opened a store
    StoreOpened {
        /// Owning merchant
        owner: AccountId,
        /// Allocated store id
        store_id: StoreId,
    },
    /// A merchant added a product to an owned store
    ProductAdded {
        /// Store receiving the product
        store_id: StoreId,
        /// Allocated sku
        sku: Sku,
    },
    /// A merchant edited a product in an owned store
    ProductEdited {
        /// Edited product
        sku: Sku,
    },
    /// A buyer placed an order; funds escrowed, stock reserved
    OrderPlaced {
        /// Selling account
        seller: AccountId,
        /// Buying account
        buyer: AccountId,
        /// Allocated per-seller order id
        order_id: OrderId,
        /// Ordered product
        sku: Sku,
        /// Escrowed funds
        total_price: Amount,
    },
    /// A seller shipped an order; escrow released to their balance
    OrderShipped {
        /// Selling account
        seller: AccountId,
        /// Shipped order id
        order_id: OrderId,
        /// Amount credited
        total_price: Amount,
    },
    /// An account withdrew from its ledger balance
    WithdrawalMade {
        /// Withdrawing account
        account: AccountId,
        /// Amount released
        amount: Amount,
    },
    /// Admin toggled the circuit breaker
    BreakerToggled {
        /// New breaker state
        active: bool,
    },
}

/// Change notification emitted once per successful mutating operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification id (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Emission timestamp
    pub at: DateTime<Utc>,

    /// What changed
    pub change: Change,
}

impl Notification {
    /// Wrap a change in a fresh notification envelope
    pub fn new(change: Change) -> Self {
        Self {
            id: Uuid::now_v7(),
            at: Utc::now(),
            change,
        }
    }
}
