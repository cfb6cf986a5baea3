// Postgres ledger store. Runs only when TEST_DATABASE_URL points at a
// scratch database; otherwise every test returns early.

use loyalty_engine::database::{LedgerStore, PgLedgerStore};
use loyalty_engine::models::OrderStatus;
use loyalty_engine::LoyaltyError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn store() -> Option<PgLedgerStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgLedgerStore::new(&url, 10, 1, Duration::from_secs(5))
        .await
        .expect("connect to test database");
    store.migrate().await.expect("run migrations");
    Some(store)
}

/// Digit string unique per test run so reruns against the same database do
/// not collide.
fn unique_number() -> String {
    (Uuid::new_v4().as_u128() % 10u128.pow(18)).to_string()
}

#[tokio::test]
async fn test_order_insert_is_first_writer_wins() {
    let Some(store) = store().await else { return };
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let number = unique_number();

    assert!(store.insert_order(alice, &number).await.unwrap());
    assert!(!store.insert_order(bob, &number).await.unwrap());
    assert_eq!(store.find_order_owner(&number).await.unwrap(), Some(alice));

    let orders = store.orders_for_user(alice).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::New);
}

#[tokio::test]
async fn test_accrual_credits_once_and_terminal_is_final() {
    let Some(store) = store().await else { return };
    let user = Uuid::new_v4();
    let number = unique_number();
    store.insert_order(user, &number).await.unwrap();

    assert!(store
        .apply_accrual(&number, OrderStatus::Processing, None)
        .await
        .unwrap());
    assert!(store
        .apply_accrual(&number, OrderStatus::Processed, Some(dec!(729.98)))
        .await
        .unwrap());
    assert!(!store
        .apply_accrual(&number, OrderStatus::Processed, Some(dec!(729.98)))
        .await
        .unwrap());
    assert!(!store
        .apply_accrual(&number, OrderStatus::Invalid, None)
        .await
        .unwrap());

    let account = store.balance(user).await.unwrap();
    assert_eq!(account.current_balance, dec!(729.98));
    assert_eq!(account.withdrawn_total, Decimal::ZERO);
}

#[tokio::test]
async fn test_withdraw_checks_balance_and_reference() {
    let Some(store) = store().await else { return };
    let user = Uuid::new_v4();
    let order = unique_number();
    store.insert_order(user, &order).await.unwrap();
    store
        .apply_accrual(&order, OrderStatus::Processed, Some(dec!(500)))
        .await
        .unwrap();

    let reference = unique_number();
    let balance = store.withdraw(user, &reference, dec!(400)).await.unwrap();
    assert_eq!(balance, dec!(100));

    let duplicate = store.withdraw(user, &reference, dec!(1)).await;
    assert!(matches!(duplicate, Err(LoyaltyError::InvalidOrder(_))));

    let too_much = store.withdraw(user, &unique_number(), dec!(100.01)).await;
    assert!(matches!(too_much, Err(LoyaltyError::InsufficientFunds)));

    let account = store.balance(user).await.unwrap();
    assert_eq!(account.current_balance, dec!(100));
    assert_eq!(account.withdrawn_total, dec!(400));

    let history = store.withdrawals_for_user(user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reference, reference);
}

#[tokio::test]
async fn test_sub_hundredth_amounts_keep_ledger_balanced() {
    let Some(store) = store().await else { return };
    let user = Uuid::new_v4();
    let order = unique_number();
    store.insert_order(user, &order).await.unwrap();
    store
        .apply_accrual(&order, OrderStatus::Processed, Some(dec!(10.004)))
        .await
        .unwrap();

    let orders = store.orders_for_user(user).await.unwrap();
    assert_eq!(orders[0].accrual, Some(dec!(10.00)));

    let reference = unique_number();
    let result = store.withdraw(user, &reference, dec!(5.005)).await;
    assert!(matches!(result, Err(LoyaltyError::InvalidOrder(_))));
    let result = store.withdraw(user, &unique_number(), dec!(0.001)).await;
    assert!(matches!(result, Err(LoyaltyError::InvalidOrder(_))));

    assert_eq!(store.withdraw(user, &reference, dec!(5.01)).await.unwrap(), dec!(4.99));

    let account = store.balance(user).await.unwrap();
    assert_eq!(account.current_balance, dec!(4.99));
    assert_eq!(account.withdrawn_total, dec!(5.01));
    assert_eq!(account.current_balance + account.withdrawn_total, dec!(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let user = Uuid::new_v4();
    let order = unique_number();
    store.insert_order(user, &order).await.unwrap();
    store
        .apply_accrual(&order, OrderStatus::Processed, Some(dec!(100)))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.withdraw(user, &unique_number(), dec!(30)).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LoyaltyError::InsufficientFunds) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(succeeded, 3);
    let account = store.balance(user).await.unwrap();
    assert_eq!(account.current_balance, dec!(10));
    assert_eq!(account.withdrawn_total, dec!(90));
}
