//! Independent QA for the escrow engine public API
//!
//! Black-box: only crate exports, own collaborator doubles, real
//! multi-threaded races.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use escrow_engine::config::EscrowConfig;
use escrow_engine::escrow::{
    AutoReleaseWorker, EventKind, ManualClock, NotificationAdapter, OpResult, ShipmentInfo,
    WalletAdapter, WorkerConfig,
};
use escrow_engine::{
    CommercialRole, ConditionSpec, EscrowError, EscrowEvent, EscrowService, MemoryStore,
    TransactionId, TransactionStatus, TransactionTerms, UserId,
};

const SELLER: UserId = 1;
const BUYER: UserId = 2;

#[derive(Default)]
struct CountingWallet {
    releases: Mutex<Vec<(TransactionId, UserId, Decimal)>>,
}

impl CountingWallet {
    fn releases(&self) -> Vec<(TransactionId, UserId, Decimal)> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletAdapter for CountingWallet {
    fn name(&self) -> &'static str {
        "qa-wallet"
    }

    async fn release_funds(
        &self,
        transaction_id: TransactionId,
        to: UserId,
        amount: Decimal,
        _currency: &str,
    ) -> OpResult {
        self.releases.lock().unwrap().push((transaction_id, to, amount));
        OpResult::Success
    }

    async fn record_payment(&self, _: TransactionId, _: &str, _: &str) -> OpResult {
        OpResult::Success
    }

    async fn split_funds(
        &self,
        _: TransactionId,
        _: UserId,
        _: Decimal,
        _: UserId,
        _: Decimal,
        _: &str,
    ) -> OpResult {
        OpResult::Success
    }
}

#[derive(Default)]
struct CountingNotifier {
    count: AtomicUsize,
}

#[async_trait]
impl NotificationAdapter for CountingNotifier {
    fn name(&self) -> &'static str {
        "qa-notifier"
    }

    async fn notify(&self, _: UserId, _: EventKind, _: serde_json::Value) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn setup() -> (Arc<EscrowService>, Arc<CountingWallet>, Arc<ManualClock>) {
    let wallet = Arc::new(CountingWallet::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = Arc::new(EscrowService::new(
        Arc::new(MemoryStore::new()),
        wallet.clone(),
        Arc::new(CountingNotifier::default()),
        clock.clone(),
        EscrowConfig::default(),
    ));
    (service, wallet, clock)
}

fn shipment() -> EscrowEvent {
    EscrowEvent::ConfirmShipment(ShipmentInfo {
        carrier: "FedEx".into(),
        tracking_number: "7489".into(),
        tracking_url: Some("https://track.example/7489".into()),
    })
}

async fn shipped(service: &EscrowService, conditions: Vec<ConditionSpec>) -> TransactionId {
    let terms = TransactionTerms::new("Road bike", "GBP", dec!(1000), CommercialRole::Seller)
        .with_fee(dec!(50))
        .with_auto_release(conditions);
    let (tx, invitation) = service.create_transaction(SELLER, terms).await.unwrap();
    service.join_by_code(BUYER, &invitation.code).await.unwrap();
    service
        .apply_event(
            tx.id,
            BUYER,
            EscrowEvent::ConfirmPayment {
                method: "bank".into(),
                reference: "TRX-1".into(),
            },
        )
        .await
        .unwrap();
    service.apply_event(tx.id, SELLER, shipment()).await.unwrap();
    tx.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_many_redeemers_one_counterparty() {
    let (service, _, _) = setup();
    let terms = TransactionTerms::new("Console", "USD", dec!(300), CommercialRole::Seller);
    let (tx, invitation) = service.create_transaction(SELLER, terms).await.unwrap();

    let handles: Vec<_> = (100..116u64)
        .map(|user| {
            let service = service.clone();
            let code = invitation.code.clone();
            tokio::spawn(async move { service.join_by_code(user, &code).await })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err, &EscrowError::CodeUsed, "unexpected loser error: {err}");
    }

    let stored = service.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Active);
    assert_eq!(stored.counterparty_role, Some(CommercialRole::Buyer));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_racing_receipts_release_once() {
    let (service, wallet, _) = setup();
    let id = shipped(&service, Vec::new()).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .apply_event(id, BUYER, EscrowEvent::ConfirmReceipt { condition: None })
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            EscrowError::Conflict | EscrowError::InvalidState { .. }
        ));
    }
    assert_eq!(wallet.releases(), vec![(id, SELLER, dec!(1050))]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_scheduler_and_buyer_race_release_once() {
    let (service, wallet, clock) = setup();
    let release_at = t0() + Duration::days(3);
    let id = shipped(&service, vec![ConditionSpec::TimeBased { release_at }]).await;
    clock.set(release_at + Duration::seconds(1));

    let worker = AutoReleaseWorker::new(service.clone(), WorkerConfig::default());
    let buyer = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .apply_event(id, BUYER, EscrowEvent::ConfirmReceipt { condition: None })
                .await
        })
    };
    let scan = worker.scan_once().await.unwrap();
    let receipt = buyer.await.unwrap();

    // Whoever won, funds moved exactly once
    assert_eq!(wallet.releases().len(), 1);
    assert!(scan == 1 || receipt.is_ok());
    let stored = service.get_transaction(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn qa_total_is_fixed_at_creation() {
    let (service, _, _) = setup();
    let id = shipped(&service, Vec::new()).await;
    let tx = service.get_transaction(id).await.unwrap().unwrap();
    assert_eq!(tx.total, tx.price + tx.fee);
    assert_eq!(tx.total, dec!(1050));
    assert_eq!(tx.creator_role.complement(), tx.counterparty_role.unwrap());
}

#[tokio::test]
async fn qa_error_codes_are_stable() {
    let (service, _, clock) = setup();
    let terms = TransactionTerms::new("Lens", "USD", dec!(80), CommercialRole::Buyer);
    let (tx, invitation) = service.create_transaction(BUYER, terms).await.unwrap();

    let err = service.join_by_code(SELLER, "ZZZZZZZZZZZZ").await.unwrap_err();
    assert_eq!((err.code(), err.http_status()), ("CODE_NOT_FOUND", 404));

    clock.advance(Duration::days(8));
    let err = service.join_by_code(SELLER, &invitation.code).await.unwrap_err();
    assert_eq!(err.code(), "CODE_EXPIRED");
    assert!(!err.is_retryable());

    let tx = service.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(EscrowError::Conflict.is_retryable());
}
