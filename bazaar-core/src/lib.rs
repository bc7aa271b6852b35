//! Marketplace ledger with escrowed orders
//!
//! A single-writer marketplace ledger: accounts register as shoppers,
//! graduate to merchants through an admin-reviewed queue, open stores,
//! list products, and trade through escrowed orders. Payments are held
//! in escrow at placement and credited to the seller only when the
//! order ships; sellers withdraw their balance through a pluggable
//! external payout.
//!
//! # Architecture
//!
//! - **Single-writer actor**: all mutations funnel through one Tokio
//!   task owning the state, so operations apply in a total order with
//!   no locking at call sites.
//! - **Validate, then mutate**: every operation checks its full
//!   precondition set before touching state; a rejected operation
//!   leaves no partial effects.
//! - **Atomic persistence**: each successful operation is written to
//!   RocksDB as one `WriteBatch` covering every key it touched.
//! - **Change notifications**: each successful mutation broadcasts
//!   exactly one [`Notification`] to subscribers.
//!
//! # Invariants
//!
//! - At most one administrator exists; each account holds exactly one
//!   role.
//! - Funds are conserved: escrowed totals plus balances always equal
//!   payments accepted minus payments released.
//! - Stock never goes negative; an order either escrows the exact
//!   total or is rejected.
//! - While the circuit breaker is active every mutation except the
//!   toggle itself is refused.
//!
//! # Example
//!
//! ```no_run
//! use bazaar_core::{AccountId, Config, Market};
//!
//! #[tokio::main]
//! async fn main() -> bazaar_core::Result<()> {
//!     let market = Market::open(Config::default()).await?;
//!     market.register_admin(AccountId::new("0xadmin")).await?;
//!     market.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod actor;
pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod payout;
pub mod state;
pub mod storage;
pub mod types;

pub use config::{Config, NotificationConfig, RocksDbConfig};
pub use error::{Error, Result};
pub use market::Market;
pub use metrics::Metrics;
pub use payout::{NoopPayout, Payout, PayoutError};
pub use state::{MarketState, ADMIN_DISPLAY_NAME};
pub use storage::Storage;
pub use types::{
    AccountId, Amount, Change, ContactDetails, Notification, Order, OrderId, OrderRequest,
    Product, ProductSpec, ProspectiveMerchant, Role, ShopperRegistration, Sku, Store, StoreId,
    StoreSpec, User, UserId,
};
