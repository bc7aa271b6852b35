//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `users` - Registered users (key: account)
//! - `contacts` - Contact details (key: account)
//! - `queue` - Pending merchant requests (single key, whole queue)
//! - `stores` - Stores (key: store_id, big-endian)
//! - `registry` - Owned-store lists (key: account)
//! - `products` - Products (key: sku, big-endian)
//! - `orders` - Pending order lists (key: seller account)
//! - `meta` - Counters, breaker flag, conservation totals (single key)
//!
//! The whole state is loaded into memory on open; every successful
//! operation is persisted through one atomic [`WriteBatch`] keyed off the
//! [`Change`] it produced, so disk never observes a partial transition.

use crate::{
    error::{Error, Result},
    state::{MarketState, Meta},
    types::{AccountId, Change, ContactDetails, Order, Product, ProspectiveMerchant, Store, User},
    Config,
};
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Column family names
const CF_USERS: &str = "users";
const CF_CONTACTS: &str = "contacts";
const CF_QUEUE: &str = "queue";
const CF_STORES: &str = "stores";
const CF_REGISTRY: &str = "registry";
const CF_PRODUCTS: &str = "products";
const CF_ORDERS: &str = "orders";
const CF_META: &str = "meta";

/// Singleton keys
const QUEUE_KEY: &[u8] = b"queue";
const META_KEY: &[u8] = b"meta";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_CONTACTS, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_QUEUE, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_STORES, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_REGISTRY, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_PRODUCTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ORDERS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_hot()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db })
    }

    // Frequently written entities use LZ4 for speed; rarely touched ones
    // take the better Zstd ratio.

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_cold() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("missing column family {name}")))
    }

    /// Rebuild the full in-memory state from disk
    pub fn load_state(&self) -> Result<MarketState> {
        let users: HashMap<AccountId, User> = self.load_account_keyed(CF_USERS)?;
        let contacts: HashMap<AccountId, ContactDetails> = self.load_account_keyed(CF_CONTACTS)?;
        let registry: HashMap<AccountId, Vec<u64>> = self.load_account_keyed(CF_REGISTRY)?;
        let orders: HashMap<AccountId, Vec<Order>> = self.load_account_keyed(CF_ORDERS)?;
        let stores: HashMap<u64, Store> = self.load_id_keyed(CF_STORES)?;
        let products: HashMap<u64, Product> = self.load_id_keyed(CF_PRODUCTS)?;

        let queue: Vec<ProspectiveMerchant> = self
            .get_value(CF_QUEUE, QUEUE_KEY)?
            .unwrap_or_default();
        let meta: Meta = self.get_value(CF_META, META_KEY)?.unwrap_or_default();

        tracing::info!(
            "Loaded market state: {} users, {} stores, {} products, {} pending requests",
            users.len(),
            stores.len(),
            products.len(),
            queue.len()
        );

        Ok(MarketState::from_parts(
            users, contacts, queue, stores, registry, products, orders, meta,
        ))
    }

    /// Persist the effects of one successful operation atomically
    pub fn apply(&self, state: &MarketState, change: &Change) -> Result<()> {
        let mut batch = WriteBatch::default();

        match change {
            Change::AdminRegistered { account, .. } => {
                self.batch_user(&mut batch, state, account)?;
            }
            Change::ShopperRegistered { account, .. } => {
                self.batch_user(&mut batch, state, account)?;
                self.batch_contact(&mut batch, state, account)?;
            }
            Change::ContactUpdated { account } => {
                self.batch_contact(&mut batch, state, account)?;
            }
            Change::MerchantRequested { .. } => {
                self.batch_queue(&mut batch, state)?;
            }
            Change::MerchantApproved { account, .. } | Change::MerchantRejected { account, .. } => {
                self.batch_queue(&mut batch, state)?;
                self.batch_user(&mut batch, state, account)?;
            }
            Change::StoreOpened { owner, store_id } => {
                let store = state.store(*store_id).ok_or_else(|| {
                    Error::InvariantViolation(format!("opened store {store_id} not in state"))
                })?;
                batch.put_cf(&self.cf(CF_STORES)?, store_id.to_be_bytes(), encode(store)?);
                let owned = state.registry_of(owner).ok_or_else(|| {
                    Error::InvariantViolation(format!("owner {owner} has no store registry"))
                })?;
                batch.put_cf(&self.cf(CF_REGISTRY)?, owner.as_str(), encode(owned)?);
            }
            Change::ProductAdded { sku, .. } | Change::ProductEdited { sku } => {
                self.batch_product(&mut batch, state, *sku)?;
            }
            Change::OrderPlaced { seller, buyer, sku, .. } => {
                self.batch_product(&mut batch, state, *sku)?;
                self.batch_orders(&mut batch, state, seller)?;
                // Placement may have materialized an implicit shopper.
                self.batch_user(&mut batch, state, buyer)?;
            }
            Change::OrderShipped { seller, .. } => {
                self.batch_orders(&mut batch, state, seller)?;
                self.batch_user(&mut batch, state, seller)?;
            }
            Change::WithdrawalMade { account, .. } => {
                self.batch_user(&mut batch, state, account)?;
            }
            Change::BreakerToggled { .. } => {}
        }

        // Counters and totals ride along with every change.
        batch.put_cf(&self.cf(CF_META)?, META_KEY, encode(state.meta())?);

        self.db.write(batch)?;
        Ok(())
    }

    fn batch_user(&self, batch: &mut WriteBatch, state: &MarketState, account: &AccountId) -> Result<()> {
        let user = state.user(account).ok_or_else(|| {
            Error::InvariantViolation(format!("changed account {account} not in state"))
        })?;
        batch.put_cf(&self.cf(CF_USERS)?, account.as_str(), encode(user)?);
        Ok(())
    }

    fn batch_contact(&self, batch: &mut WriteBatch, state: &MarketState, account: &AccountId) -> Result<()> {
        let contact = state.contact(account).ok_or_else(|| {
            Error::InvariantViolation(format!("changed account {account} has no contact entry"))
        })?;
        batch.put_cf(&self.cf(CF_CONTACTS)?, account.as_str(), encode(contact)?);
        Ok(())
    }

    fn batch_queue(&self, batch: &mut WriteBatch, state: &MarketState) -> Result<()> {
        batch.put_cf(
            &self.cf(CF_QUEUE)?,
            QUEUE_KEY,
            encode(&state.prospective_merchants().to_vec())?,
        );
        Ok(())
    }

    fn batch_product(&self, batch: &mut WriteBatch, state: &MarketState, sku: u64) -> Result<()> {
        let product = state.product(sku).ok_or_else(|| {
            Error::InvariantViolation(format!("changed product {sku} not in state"))
        })?;
        batch.put_cf(&self.cf(CF_PRODUCTS)?, sku.to_be_bytes(), encode(product)?);
        Ok(())
    }

    fn batch_orders(&self, batch: &mut WriteBatch, state: &MarketState, seller: &AccountId) -> Result<()> {
        let pending = state.orders_of(seller).cloned().unwrap_or_default();
        batch.put_cf(&self.cf(CF_ORDERS)?, seller.as_str(), encode(&pending)?);
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(&self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_account_keyed<T: DeserializeOwned>(&self, cf: &str) -> Result<HashMap<AccountId, T>> {
        let mut map = HashMap::new();
        for item in self.db.iterator_cf(&self.cf(cf)?, IteratorMode::Start) {
            let (key, value) = item?;
            let account = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Storage(format!("non-utf8 account key: {e}")))?;
            map.insert(AccountId::new(account), bincode::deserialize(&value)?);
        }
        Ok(map)
    }

    fn load_id_keyed<T: DeserializeOwned>(&self, cf: &str) -> Result<HashMap<u64, T>> {
        let mut map = HashMap::new();
        for item in self.db.iterator_cf(&self.cf(cf)?, IteratorMode::Start) {
            let (key, value) = item?;
            let bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("malformed id key".to_string()))?;
            map.insert(u64::from_be_bytes(bytes), bincode::deserialize(&value)?);
        }
        Ok(map)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}
