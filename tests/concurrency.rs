use std::sync::Arc;

use order_eng::config::Config;
use order_eng::engine::promo;
use order_eng::gateway::OfflineGateway;
use order_eng::model::{DiscountType, NewVariant, PromoCodeInput};
use order_eng::store::{MemoryStore, Store, StoreTx};
use order_eng::{Amount, Engine, ErrorKind, Identity, OrderStatus};

type TestEngine = Engine<MemoryStore, OfflineGateway>;

fn admin() -> Identity {
    Identity::admin("admin")
}

fn customer(n: usize) -> Identity {
    Identity::customer(format!("customer-{n}"))
}

async fn engine_with_stock(stock: u32) -> Arc<TestEngine> {
    engine_on(MemoryStore::new(), stock).await
}

/// Engine over `store`, so tests can also open transactions on it directly.
async fn engine_on(store: MemoryStore, stock: u32) -> Arc<TestEngine> {
    let engine = Engine::new(store, OfflineGateway, &Config::offline().payment);
    engine
        .register_variant(
            &admin(),
            NewVariant {
                id: 1,
                sku: "TEE-M".to_string(),
                base_price: Amount::from_major(200),
                price_modifier: Amount::ZERO,
                stock,
            },
        )
        .await
        .unwrap();
    Arc::new(engine)
}

async fn create_save10(engine: &TestEngine, usage_limit: Option<u32>) {
    engine
        .create_promo(
            &admin(),
            PromoCodeInput {
                code: "SAVE10".to_string(),
                discount_type: DiscountType::Percentage,
                discount_value: Amount::from_major(10),
                valid_from: None,
                valid_until: None,
                is_active: true,
                usage_limit,
            },
        )
        .await
        .unwrap();
}

/// Consume one use of `code` in a transaction of its own.
async fn redeem_once(store: &MemoryStore, code: &str) -> bool {
    let mut tx = store.begin().await.unwrap();
    let redeemed = promo::redeem(tx.as_mut(), code).await.unwrap();
    tx.commit().await.unwrap();
    redeemed
}

/// Checkout `quantity` units for each customer concurrently.
async fn concurrent_checkouts(
    engine: &Arc<TestEngine>,
    customers: usize,
    quantity: u32,
    promo: Option<&'static str>,
) -> Vec<Result<(), ErrorKind>> {
    for n in 0..customers {
        engine.add_to_cart(&customer(n), 1, quantity).await.unwrap();
    }
    let handles: Vec<_> = (0..customers)
        .map(|n| {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                engine
                    .checkout(&customer(n), "1 Main St", promo)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.kind())
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_units_are_never_oversold() {
    let engine = engine_with_stock(5).await;
    let results = concurrent_checkouts(&engine, 2, 3, None).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err(ErrorKind::InsufficientStock)));
    let record = engine.inventory(1).await.unwrap();
    assert_eq!((record.stock, record.reserved), (5, 3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_checkouts_reserve_at_most_stock() {
    let engine = engine_with_stock(7).await;
    let results = concurrent_checkouts(&engine, 20, 1, None).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 7);
    assert!(
        results
            .iter()
            .all(|r| r.is_ok() || *r == Err(ErrorKind::InsufficientStock))
    );
    let record = engine.inventory(1).await.unwrap();
    assert_eq!(record.reserved, 7);
    assert_eq!(record.available(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn promo_usage_never_exceeds_limit() {
    let engine = engine_with_stock(100).await;
    create_save10(&engine, Some(3)).await;

    let results = concurrent_checkouts(&engine, 10, 1, Some("SAVE10")).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(
        results
            .iter()
            .filter(|r| **r == Err(ErrorKind::PromoLimitReached))
            .count(),
        7
    );
    let promos = engine.promo_codes(&admin()).await.unwrap();
    assert_eq!(promos[0].usage_count, 3);
    // failed checkouts hold no stock
    assert_eq!(engine.inventory(1).await.unwrap().reserved, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeems_stop_at_limit() {
    let store = MemoryStore::new();
    let engine = engine_on(store.clone(), 1).await;
    create_save10(&engine, Some(2)).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { redeem_once(&store, "save10").await })
        })
        .collect();
    let mut redeemed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            redeemed += 1;
        }
    }
    assert_eq!(redeemed, 2);
    let promos = engine.promo_codes(&admin()).await.unwrap();
    assert_eq!(promos[0].usage_count, 2);
}

#[tokio::test]
async fn save10_preview_then_single_redeem() {
    let store = MemoryStore::new();
    let engine = engine_on(store.clone(), 1).await;
    create_save10(&engine, Some(1)).await;

    let preview = engine
        .preview_promo("SAVE10", Amount::from_major(200))
        .await
        .unwrap();
    assert!(preview.valid);
    assert_eq!(preview.discount_amount, Amount::from_major(20));

    assert!(redeem_once(&store, "SAVE10").await);
    assert!(!redeem_once(&store, "SAVE10").await);

    // previews never consume a use
    let preview = engine
        .preview_promo("SAVE10", Amount::from_major(200))
        .await
        .unwrap();
    assert!(!preview.valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_cart_checked_out_twice_makes_one_order() {
    let engine = engine_with_stock(10).await;
    let alice = customer(0);
    engine.add_to_cart(&alice, 1, 2).await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let alice = alice.clone();
            tokio::spawn(async move {
                engine
                    .checkout(&alice, "1 Main St", None)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.kind())
            })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err(ErrorKind::EmptyCart)));
    assert_eq!(engine.my_orders(&alice).await.unwrap().len(), 1);
    assert_eq!(engine.inventory(1).await.unwrap().reserved, 2);
}

#[tokio::test]
async fn failed_checkout_keeps_availability() {
    let engine = engine_with_stock(4).await;
    let alice = customer(0);
    engine.add_to_cart(&alice, 1, 3).await.unwrap();
    let before = engine.available_quantity(1).await.unwrap();

    let err = engine
        .checkout(&alice, "1 Main St", Some("BOGUS"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPromoCode);
    assert_eq!(engine.available_quantity(1).await.unwrap(), before);
    assert_eq!(engine.cart(&alice).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn shipped_order_cannot_be_cancelled() {
    let engine = engine_with_stock(5).await;
    let alice = customer(0);
    engine.add_to_cart(&alice, 1, 1).await.unwrap();
    let order = engine.checkout(&alice, "1 Main St", None).await.unwrap();
    for status in ["confirmed", "shipped"] {
        engine
            .update_order_status(&admin(), order.id, status)
            .await
            .unwrap();
    }

    let err = engine.cancel_order(&alice, order.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let order = engine.order(&alice, order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn delivery_deducts_stock_and_reservation() {
    let engine = engine_with_stock(10).await;
    let alice = customer(0);
    engine.add_to_cart(&alice, 1, 2).await.unwrap();
    let order = engine.checkout(&alice, "1 Main St", None).await.unwrap();
    for status in ["confirmed", "shipped"] {
        engine
            .update_order_status(&admin(), order.id, status)
            .await
            .unwrap();
    }
    let record = engine.inventory(1).await.unwrap();
    assert_eq!((record.stock, record.reserved), (10, 2));

    engine
        .update_order_status(&admin(), order.id, "delivered")
        .await
        .unwrap();
    let record = engine.inventory(1).await.unwrap();
    assert_eq!((record.stock, record.reserved), (8, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_cancels_release_once() {
    let engine = engine_with_stock(5).await;
    let alice = customer(0);
    engine.add_to_cart(&alice, 1, 3).await.unwrap();
    let order = engine.checkout(&alice, "1 Main St", None).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let alice = alice.clone();
            tokio::spawn(async move {
                engine
                    .cancel_order(&alice, order.id)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.kind())
            })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| **r == Err(ErrorKind::InvalidTransition))
            .count(),
        3
    );
    let record = engine.inventory(1).await.unwrap();
    assert_eq!((record.stock, record.reserved), (5, 0));
}
