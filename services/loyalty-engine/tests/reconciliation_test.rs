// Reconciliation view and background pass with a scripted accrual service

use async_trait::async_trait;
use loyalty_engine::accrual_client::AccrualClient;
use loyalty_engine::database::{InMemoryLedgerStore, LedgerStore};
use loyalty_engine::models::{AccrualResponse, AccrualStatus, OrderStatus};
use loyalty_engine::services::{ReconciliationService, ReconcileReport};
use loyalty_engine::{LoyaltyError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
enum Reply {
    Status(AccrualStatus, Option<Decimal>),
    RateLimited(u64),
    Broken,
}

#[derive(Default)]
struct ScriptedAccrual {
    replies: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
}

impl ScriptedAccrual {
    fn reply(&self, order: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(order.to_string(), reply);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccrualClient for ScriptedAccrual {
    async fn get_order_accrual(&self, order_number: &str) -> Result<AccrualResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().get(order_number).cloned();

        match reply {
            Some(Reply::Status(status, accrual)) => Ok(AccrualResponse {
                order: order_number.to_string(),
                status,
                accrual,
            }),
            Some(Reply::RateLimited(secs)) => Err(LoyaltyError::TooManyRequests {
                retry_after: Duration::from_secs(secs),
            }),
            Some(Reply::Broken) => Err(LoyaltyError::AccrualService("boom".to_string())),
            None => Ok(AccrualResponse::processing(order_number)),
        }
    }
}

fn setup() -> (Arc<InMemoryLedgerStore>, Arc<ScriptedAccrual>, Arc<ReconciliationService>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let accrual = Arc::new(ScriptedAccrual::default());
    let service = Arc::new(ReconciliationService::new(store.clone(), accrual.clone()));
    (store, accrual, service)
}

#[tokio::test]
async fn test_view_projects_fresh_status_and_credits_balance() {
    let (store, accrual, service) = setup();
    let user = Uuid::new_v4();
    store.insert_order(user, "79927398713").await.unwrap();
    store.insert_order(user, "12345678903").await.unwrap();
    accrual.reply("79927398713", Reply::Status(AccrualStatus::Processed, Some(dec!(500))));
    accrual.reply("12345678903", Reply::Status(AccrualStatus::Registered, None));

    let orders = service.user_orders(user).await.unwrap();

    assert_eq!(orders[0].number, "12345678903");
    assert_eq!(orders[0].status, OrderStatus::Processing);
    assert_eq!(orders[1].status, OrderStatus::Processed);
    assert_eq!(orders[1].accrual, Some(dec!(500)));
    assert_eq!(store.balance(user).await.unwrap().current_balance, dec!(500));

    // The credit lands once even when the view is requested again.
    service.user_orders(user).await.unwrap();
    assert_eq!(store.balance(user).await.unwrap().current_balance, dec!(500));
}

#[tokio::test]
async fn test_terminal_orders_are_not_queried() {
    let (store, accrual, service) = setup();
    let user = Uuid::new_v4();
    store.insert_order(user, "79927398713").await.unwrap();
    store
        .apply_accrual("79927398713", OrderStatus::Invalid, None)
        .await
        .unwrap();

    let orders = service.user_orders(user).await.unwrap();

    assert_eq!(orders[0].status, OrderStatus::Invalid);
    assert_eq!(accrual.calls(), 0);
}

#[tokio::test]
async fn test_rate_limit_stops_the_view_and_surfaces_delay() {
    let (store, accrual, service) = setup();
    let user = Uuid::new_v4();
    store.insert_order(user, "79927398713").await.unwrap();
    store.insert_order(user, "12345678903").await.unwrap();
    store.insert_order(user, "2377225624").await.unwrap();
    // Newest first: 2377225624 is queried first and is rate limited.
    accrual.reply("2377225624", Reply::RateLimited(45));

    let result = service.user_orders(user).await;

    match result {
        Err(LoyaltyError::TooManyRequests { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(45));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert_eq!(accrual.calls(), 1);
}

#[tokio::test]
async fn test_accrual_failure_keeps_stored_status() {
    let (store, accrual, service) = setup();
    let user = Uuid::new_v4();
    store.insert_order(user, "79927398713").await.unwrap();
    store.insert_order(user, "12345678903").await.unwrap();
    accrual.reply("12345678903", Reply::Broken);
    accrual.reply("79927398713", Reply::Status(AccrualStatus::Processed, Some(dec!(20))));

    let orders = service.user_orders(user).await.unwrap();

    assert_eq!(orders[0].status, OrderStatus::New);
    assert_eq!(orders[1].status, OrderStatus::Processed);
    assert_eq!(accrual.calls(), 2);
}

#[tokio::test]
async fn test_background_pass_reports_progress() {
    let (store, accrual, service) = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    store.insert_order(alice, "79927398713").await.unwrap();
    store.insert_order(bob, "12345678903").await.unwrap();
    accrual.reply("79927398713", Reply::Status(AccrualStatus::Processed, Some(dec!(120.5))));
    accrual.reply("12345678903", Reply::Status(AccrualStatus::Invalid, None));

    let report = service.reconcile_pending(10).await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            checked: 2,
            updated: 2,
            retry_after: None
        }
    );
    assert_eq!(store.balance(alice).await.unwrap().current_balance, dec!(120.5));
    assert_eq!(store.balance(bob).await.unwrap().current_balance, Decimal::ZERO);
    assert!(store.pending_orders(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_background_pass_stops_on_rate_limit() {
    let (store, accrual, service) = setup();
    let user = Uuid::new_v4();
    store.insert_order(user, "79927398713").await.unwrap();
    store.insert_order(user, "12345678903").await.unwrap();
    store.insert_order(user, "2377225624").await.unwrap();
    accrual.reply("79927398713", Reply::Status(AccrualStatus::Processed, Some(dec!(5))));
    accrual.reply("12345678903", Reply::RateLimited(7));

    let report = service.reconcile_pending(10).await.unwrap();

    assert_eq!(report.checked, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.retry_after, Some(Duration::from_secs(7)));
    assert_eq!(accrual.calls(), 2);
}

#[tokio::test]
async fn test_background_loop_exits_on_cancel() {
    let (store, accrual, service) = setup();
    let user = Uuid::new_v4();
    store.insert_order(user, "79927398713").await.unwrap();
    accrual.reply("79927398713", Reply::Status(AccrualStatus::Processed, Some(dec!(42))));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(service.clone().run(
        Duration::from_millis(20),
        10,
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reconciler should stop")
        .unwrap();

    assert_eq!(store.balance(user).await.unwrap().current_balance, dec!(42));
}
