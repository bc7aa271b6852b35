//! Property-based tests for marketplace invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Fund conservation: escrow + balances == accepted - released
//! - Role exclusivity: at most one admin, one role per account
//! - Stock safety: inventory never goes negative
//! - Exact payment: an order escrows the exact total or is rejected

use bazaar_core::{
    AccountId, Config, ContactDetails, Error, Market, MarketState, NoopPayout, OrderRequest,
    Payout, PayoutError, ProductSpec, Role, ShopperRegistration, StoreSpec,
};
use proptest::prelude::*;

/// Strategy for generating account ids
fn account_strategy() -> impl Strategy<Value = AccountId> {
    "0x[0-9a-f]{8}".prop_map(AccountId::new)
}

/// Strategy for generating display names
fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z]{3,12}"
}

fn contact_strategy() -> impl Strategy<Value = ContactDetails> {
    ("[A-Za-z0-9 ]{5,30}", "[a-z]{3,8}@example\\.com", 1u64..10_000_000_000u64).prop_map(
        |(address, email, phone)| ContactDetails {
            address,
            email,
            phone,
        },
    )
}

/// Sum of escrow and balances must equal accepted minus released
fn conservation_holds(state: &MarketState) -> bool {
    let meta = state.meta();
    state.escrowed_total() + state.balance_total() == meta.total_accepted - meta.total_released
}

/// Seed a market with an admin, an approved merchant, a store and one product
///
/// Returns the state plus the merchant account and the product sku.
fn seeded_market(price: u64, shipping: u64, stock: u64) -> (MarketState, AccountId, u64) {
    let mut state = MarketState::new();
    let admin = AccountId::new("0xadmin");
    let merchant = AccountId::new("0xmerchant");

    state.register_admin(&admin).unwrap();
    state
        .register_shopper(
            &merchant,
            ShopperRegistration {
                name: "Phil".to_string(),
                contact: ContactDetails {
                    address: "1 Market St".to_string(),
                    email: "phil@example.com".to_string(),
                    phone: 5551234,
                },
            },
        )
        .unwrap();
    state
        .request_merchant_status(&merchant, "Phil".to_string())
        .unwrap();
    state.approve_merchant(&admin, 0).unwrap();
    let store_id = match state
        .open_store(
            &merchant,
            StoreSpec {
                title: "Pet Shop".to_string(),
                description: "Supplies".to_string(),
            },
        )
        .unwrap()
    {
        bazaar_core::Change::StoreOpened { store_id, .. } => store_id,
        _ => unreachable!(),
    };
    let sku = match state
        .add_product(
            &merchant,
            store_id,
            ProductSpec {
                title: "Dog Bowl".to_string(),
                description: "Ceramic".to_string(),
                price,
                shipping_price: shipping,
                image: "bowl.png".to_string(),
                quantity: stock,
            },
        )
        .unwrap()
    {
        bazaar_core::Change::ProductAdded { sku, .. } => sku,
        _ => unreachable!(),
    };

    (state, merchant, sku)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: funds are conserved across place/ship/withdraw sequences
    #[test]
    fn prop_funds_conserved(
        price in 1u64..1_000u64,
        shipping in 0u64..100u64,
        quantities in prop::collection::vec(1u64..4u64, 1..8),
    ) {
        let stock = 100u64;
        let (mut state, merchant, sku) = seeded_market(price, shipping, stock);
        let buyer = AccountId::new("0xbuyer");

        for quantity in quantities {
            let total = (price + shipping) * quantity;
            let placed = state.place_order(
                &buyer,
                OrderRequest { sku, quantity, payment_amount: total },
            );
            prop_assert!(placed.is_ok());
            prop_assert!(conservation_holds(&state));
        }

        // Ship everything, always from the front of the pending list.
        while state.order_count(&merchant) > 0 {
            prop_assert!(state.ship_order(&merchant, 0).is_ok());
            prop_assert!(conservation_holds(&state));
        }

        // Escrow is drained into the seller balance.
        prop_assert_eq!(state.escrowed_total(), 0);

        let balance = state.user(&merchant).unwrap().balance;
        if balance > 0 {
            prop_assert!(state.withdraw(&merchant, balance, &NoopPayout).is_ok());
        }
        prop_assert!(conservation_holds(&state));
        prop_assert_eq!(state.balance_total(), 0);
    }

    /// Property: at most one admin ever exists
    #[test]
    fn prop_at_most_one_admin(
        accounts in prop::collection::vec(account_strategy(), 1..10),
    ) {
        let mut state = MarketState::new();
        for account in &accounts {
            let _ = state.register_admin(account);
        }

        let admins = accounts
            .iter()
            .filter(|a| matches!(state.user(a).map(|u| u.role), Some(Role::Admin)))
            .count();
        prop_assert_eq!(admins, 1);
    }

    /// Property: each account holds exactly one role
    #[test]
    fn prop_one_role_per_account(
        account in account_strategy(),
        name in name_strategy(),
        contact in contact_strategy(),
    ) {
        let mut state = MarketState::new();
        state
            .register_shopper(&account, ShopperRegistration { name, contact })
            .unwrap();

        // Re-registering the same account is always rejected.
        let again = state.register_shopper(
            &account,
            ShopperRegistration {
                name: "Other".to_string(),
                contact: ContactDetails {
                    address: String::new(),
                    email: String::new(),
                    phone: 0,
                },
            },
        );
        prop_assert!(matches!(again, Err(Error::DuplicateRegistration(_))));
        prop_assert_eq!(state.user(&account).map(|u| u.role), Some(Role::Shopper));
    }

    /// Property: stock never goes negative and units sold never exceed it
    #[test]
    fn prop_stock_never_oversold(
        stock in 1u64..20u64,
        attempts in prop::collection::vec(1u64..25u64, 1..12),
    ) {
        let price = 10u64;
        let (mut state, _merchant, sku) = seeded_market(price, 0, stock);
        let buyer = AccountId::new("0xbuyer");
        let mut sold = 0u64;

        for quantity in attempts {
            let total = price * quantity;
            let result = state.place_order(
                &buyer,
                OrderRequest { sku, quantity, payment_amount: total },
            );
            match result {
                Ok(_) => sold += quantity,
                Err(Error::InsufficientStock { requested, available }) => {
                    prop_assert_eq!(requested, quantity);
                    prop_assert!(requested > available);
                }
                Err(other) => prop_assert!(false, "unexpected rejection: {other}"),
            }
        }

        let remaining = state.product(sku).unwrap().quantity;
        prop_assert_eq!(remaining + sold, stock);
    }

    /// Property: a payment that is not the exact total is rejected untouched
    #[test]
    fn prop_inexact_payment_rejected(
        price in 1u64..1_000u64,
        shipping in 0u64..100u64,
        quantity in 1u64..5u64,
        offset in 1u64..50u64,
        overpay in any::<bool>(),
    ) {
        let (mut state, _merchant, sku) = seeded_market(price, shipping, 10);
        let buyer = AccountId::new("0xbuyer");
        let expected = (price + shipping) * quantity;
        let payment = if overpay {
            expected + offset
        } else {
            expected.saturating_sub(offset)
        };
        prop_assume!(payment != expected);

        let result = state.place_order(
            &buyer,
            OrderRequest { sku, quantity, payment_amount: payment },
        );
        let rejected = matches!(
            result,
            Err(Error::PaymentMismatch { expected: e, got }) if e == expected && got == payment
        );
        prop_assert!(rejected);

        // Nothing was escrowed and stock is untouched.
        prop_assert_eq!(state.escrowed_total(), 0);
        prop_assert_eq!(state.product(sku).unwrap().quantity, 10);
        prop_assert!(state.user(&buyer).is_none());
    }
}

mod integration_tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Create test market with temp directory
    async fn create_test_market() -> (Market, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let market = Market::open(config).await.unwrap();
        (market, temp_dir)
    }

    fn phil_registration() -> ShopperRegistration {
        ShopperRegistration {
            name: "Phil".to_string(),
            contact: ContactDetails {
                address: "1 Market St".to_string(),
                email: "phil@example.com".to_string(),
                phone: 5551234,
            },
        }
    }

    #[tokio::test]
    async fn test_full_marketplace_lifecycle() {
        let (market, _dir) = create_test_market().await;
        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");
        let buyer = AccountId::new("0xbuyer");

        // 1. Admin and shopper registration
        assert_eq!(market.register_admin(admin.clone()).await.unwrap(), 1);
        assert_eq!(
            market
                .register_shopper(phil.clone(), phil_registration())
                .await
                .unwrap(),
            2
        );

        // 2. Phil asks for merchant status and the admin approves
        let index = market
            .request_merchant_status(phil.clone(), "Phil".to_string())
            .await
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(market.prospective_merchant_count().await.unwrap(), 1);
        market.approve_merchant(admin.clone(), 0).await.unwrap();
        assert_eq!(market.prospective_merchant_count().await.unwrap(), 0);
        assert_eq!(
            market.get_user(phil.clone()).await.unwrap().unwrap().role,
            Role::Merchant
        );

        // 3. Store and product
        let store_id = market
            .open_store(
                phil.clone(),
                StoreSpec {
                    title: "Pet Shop".to_string(),
                    description: "Supplies for pets".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store_id, 1);
        assert_eq!(market.store_count_owned(phil.clone()).await.unwrap(), 1);

        let sku = market
            .add_product(
                phil.clone(),
                store_id,
                ProductSpec {
                    title: "Dog Bowl".to_string(),
                    description: "Plastic".to_string(),
                    price: 20,
                    shipping_price: 5,
                    image: "bowl.png".to_string(),
                    quantity: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(sku, 1);

        // 4. Edit replaces every product field except the sku
        market
            .edit_product(
                phil.clone(),
                sku,
                ProductSpec {
                    title: "Dog Bowl".to_string(),
                    description: "Ceramic".to_string(),
                    price: 25,
                    shipping_price: 5,
                    image: "bowl.png".to_string(),
                    quantity: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(market.get_product(sku).await.unwrap().unwrap().price, 25);

        // 5. Order: 2 units at (25 + 5 shipping) each, so exactly 60
        let order_id = market
            .place_order(
                buyer.clone(),
                OrderRequest {
                    sku,
                    quantity: 2,
                    payment_amount: 60,
                },
            )
            .await
            .unwrap();
        assert_eq!(order_id, 1);

        // Stock decremented, payment escrowed, seller not yet credited.
        assert_eq!(market.get_product(sku).await.unwrap().unwrap().quantity, 3);
        assert_eq!(market.order_count(phil.clone()).await.unwrap(), 1);
        assert_eq!(
            market.get_user(phil.clone()).await.unwrap().unwrap().balance,
            0
        );

        // The buyer was implicitly registered as a shopper.
        assert_eq!(
            market.get_user(buyer.clone()).await.unwrap().unwrap().role,
            Role::Shopper
        );

        // 6. Shipping releases escrow to the seller
        let credited = market.ship_order(phil.clone(), 0).await.unwrap();
        assert_eq!(credited, 60);
        assert_eq!(market.order_count(phil.clone()).await.unwrap(), 0);
        assert_eq!(
            market.get_user(phil.clone()).await.unwrap().unwrap().balance,
            60
        );

        // 7. Withdrawal drains the balance
        market.withdraw(phil.clone(), 60).await.unwrap();
        assert_eq!(
            market.get_user(phil.clone()).await.unwrap().unwrap().balance,
            0
        );

        market.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_breaker_halts_all_mutations_except_toggle() {
        let (market, _dir) = create_test_market().await;
        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");

        market.register_admin(admin.clone()).await.unwrap();
        assert!(market.toggle_breaker(admin.clone()).await.unwrap());
        assert!(market.breaker_active().await.unwrap());

        // Every other mutation is refused while halted.
        let err = market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SystemHalted));
        let err = market.withdraw(admin.clone(), 1).await.unwrap_err();
        assert!(matches!(err, Error::SystemHalted));

        // Reads still work.
        assert!(market.get_user(admin.clone()).await.unwrap().is_some());

        // The toggle itself is exempt, otherwise a halt would be permanent.
        assert!(!market.toggle_breaker(admin.clone()).await.unwrap());
        market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap();

        market.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_only_admin_toggles_breaker() {
        let (market, _dir) = create_test_market().await;
        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");

        market.register_admin(admin.clone()).await.unwrap();
        market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap();

        let err = market.toggle_breaker(phil.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(!market.breaker_active().await.unwrap());

        market.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");

        {
            let market = Market::open(config.clone()).await.unwrap();
            market.register_admin(admin.clone()).await.unwrap();
            market
                .register_shopper(phil.clone(), phil_registration())
                .await
                .unwrap();
            market
                .request_merchant_status(phil.clone(), "Phil".to_string())
                .await
                .unwrap();
            market.approve_merchant(admin.clone(), 0).await.unwrap();
            let store_id = market
                .open_store(
                    phil.clone(),
                    StoreSpec {
                        title: "Pet Shop".to_string(),
                        description: "Supplies".to_string(),
                    },
                )
                .await
                .unwrap();
            market
                .add_product(
                    phil.clone(),
                    store_id,
                    ProductSpec {
                        title: "Dog Bowl".to_string(),
                        description: "Ceramic".to_string(),
                        price: 25,
                        shipping_price: 5,
                        image: "bowl.png".to_string(),
                        quantity: 5,
                    },
                )
                .await
                .unwrap();
            market.shutdown().await.unwrap();
        }

        let market = Market::open(config).await.unwrap();
        let user = market.get_user(phil.clone()).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Merchant);
        assert_eq!(user.user_id, 2);

        let contact = market.get_contact(phil.clone()).await.unwrap().unwrap();
        assert_eq!(contact.email, "phil@example.com");

        let product = market.get_product(1).await.unwrap().unwrap();
        assert_eq!(product.price, 25);
        assert_eq!(product.quantity, 5);

        assert_eq!(market.stores_owned(phil.clone()).await.unwrap(), vec![1]);

        // Id allocation resumes where it left off.
        let buyer = AccountId::new("0xbuyer");
        let user_id = market
            .register_shopper(buyer, phil_registration())
            .await
            .unwrap();
        assert_eq!(user_id, 3);

        market.shutdown().await.unwrap();
    }

    /// Payout that always refuses, for rollback testing
    struct RefusingPayout;

    impl Payout for RefusingPayout {
        fn release(&self, _account: &AccountId, _amount: u64) -> Result<(), PayoutError> {
            Err(PayoutError::new("gateway offline"))
        }
    }

    #[tokio::test]
    async fn test_failed_payout_rolls_back_balance() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let market = Market::open_with_payout(config, Box::new(RefusingPayout))
            .await
            .unwrap();

        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");
        let buyer = AccountId::new("0xbuyer");

        market.register_admin(admin.clone()).await.unwrap();
        market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap();
        market
            .request_merchant_status(phil.clone(), "Phil".to_string())
            .await
            .unwrap();
        market.approve_merchant(admin.clone(), 0).await.unwrap();
        let store_id = market
            .open_store(
                phil.clone(),
                StoreSpec {
                    title: "Pet Shop".to_string(),
                    description: "Supplies".to_string(),
                },
            )
            .await
            .unwrap();
        let sku = market
            .add_product(
                phil.clone(),
                store_id,
                ProductSpec {
                    title: "Dog Bowl".to_string(),
                    description: "Ceramic".to_string(),
                    price: 25,
                    shipping_price: 5,
                    image: "bowl.png".to_string(),
                    quantity: 5,
                },
            )
            .await
            .unwrap();
        market
            .place_order(
                buyer,
                OrderRequest {
                    sku,
                    quantity: 1,
                    payment_amount: 30,
                },
            )
            .await
            .unwrap();
        market.ship_order(phil.clone(), 0).await.unwrap();

        let err = market.withdraw(phil.clone(), 30).await.unwrap_err();
        assert!(matches!(err, Error::ExternalReleaseFailed(_)));

        // The debit was rolled back.
        assert_eq!(
            market.get_user(phil.clone()).await.unwrap().unwrap().balance,
            30
        );

        market.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_exceeding_balance_rejected() {
        let (market, _dir) = create_test_market().await;
        let phil = AccountId::new("0xphil");

        market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap();

        let err = market.withdraw(phil.clone(), 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance {
                requested: 10,
                available: 0
            }
        ));

        market.shutdown().await.unwrap();
    }

    /// Counting payout, to check withdraw calls the collaborator once
    struct CountingPayout(Arc<AtomicU64>);

    impl Payout for CountingPayout {
        fn release(&self, _account: &AccountId, amount: u64) -> Result<(), PayoutError> {
            self.0.fetch_add(amount, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_withdraw_releases_through_payout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let released = Arc::new(AtomicU64::new(0));
        let market =
            Market::open_with_payout(config, Box::new(CountingPayout(released.clone())))
                .await
                .unwrap();

        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");
        let buyer = AccountId::new("0xbuyer");

        market.register_admin(admin.clone()).await.unwrap();
        market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap();
        market
            .request_merchant_status(phil.clone(), "Phil".to_string())
            .await
            .unwrap();
        market.approve_merchant(admin.clone(), 0).await.unwrap();
        let store_id = market
            .open_store(
                phil.clone(),
                StoreSpec {
                    title: "Pet Shop".to_string(),
                    description: "Supplies".to_string(),
                },
            )
            .await
            .unwrap();
        let sku = market
            .add_product(
                phil.clone(),
                store_id,
                ProductSpec {
                    title: "Dog Bowl".to_string(),
                    description: "Ceramic".to_string(),
                    price: 25,
                    shipping_price: 5,
                    image: "bowl.png".to_string(),
                    quantity: 5,
                },
            )
            .await
            .unwrap();
        market
            .place_order(
                buyer,
                OrderRequest {
                    sku,
                    quantity: 2,
                    payment_amount: 60,
                },
            )
            .await
            .unwrap();
        market.ship_order(phil.clone(), 0).await.unwrap();

        market.withdraw(phil.clone(), 20).await.unwrap();
        market.withdraw(phil.clone(), 40).await.unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 60);
        assert_eq!(
            market.get_user(phil.clone()).await.unwrap().unwrap().balance,
            0
        );

        market.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_track_mutations() {
        let (market, _dir) = create_test_market().await;
        let mut changes = market.subscribe();

        let admin = AccountId::new("0xadmin");
        let phil = AccountId::new("0xphil");

        market.register_admin(admin.clone()).await.unwrap();
        market
            .register_shopper(phil.clone(), phil_registration())
            .await
            .unwrap();

        // A rejected mutation emits nothing.
        let _ = market.register_admin(phil.clone()).await;

        let first = changes.recv().await.unwrap();
        assert!(matches!(
            first.change,
            bazaar_core::Change::AdminRegistered { user_id: 1, .. }
        ));
        let second = changes.recv().await.unwrap();
        assert!(matches!(
            second.change,
            bazaar_core::Change::ShopperRegistered { user_id: 2, .. }
        ));
        assert!(second.at >= first.at);

        market.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_merchant_queue_compacts_on_decision() {
        let (market, _dir) = create_test_market().await;
        let admin = AccountId::new("0xadmin");

        market.register_admin(admin.clone()).await.unwrap();
        for (i, name) in ["Ann", "Ben", "Cal"].iter().enumerate() {
            let account = AccountId::new(format!("0x{i}"));
            market
                .register_shopper(
                    account.clone(),
                    ShopperRegistration {
                        name: name.to_string(),
                        contact: ContactDetails {
                            address: String::new(),
                            email: String::new(),
                            phone: 0,
                        },
                    },
                )
                .await
                .unwrap();
            market
                .request_merchant_status(account, name.to_string())
                .await
                .unwrap();
        }

        // Rejecting the middle entry shifts the tail left.
        market.reject_merchant(admin.clone(), 1).await.unwrap();
        let queue = market.prospective_merchants().await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].name, "Ann");
        assert_eq!(queue[1].name, "Cal");

        // Ben stays a shopper.
        assert_eq!(
            market
                .get_user(AccountId::new("0x1"))
                .await
                .unwrap()
                .unwrap()
                .role,
            Role::Shopper
        );

        market.shutdown().await.unwrap();
    }
}
