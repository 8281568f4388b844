//! Collaborator Adapters
//!
//! Narrow interfaces to the wallet and notification services. They are
//! called only AFTER a transition has been committed; their failures are
//! logged and retried by the collaborator, never rolled back into the
//! lifecycle.

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::types::{TransactionId, UserId};

/// Operation result from collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Success,
    /// Explicit rejection by the collaborator
    Failed(String),
    /// Accepted for asynchronous processing
    Pending,
}

impl OpResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, OpResult::Success)
    }

    #[inline]
    pub fn is_explicit_fail(&self) -> bool {
        matches!(self, OpResult::Failed(_))
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, OpResult::Pending)
    }
}

/// Event kinds pushed to the notification collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TransactionCreated,
    CounterpartyJoined,
    DeliveryDetailsSubmitted,
    PaymentRequested,
    PaymentConfirmed,
    ShipmentConfirmed,
    TransactionCompleted,
    TransactionCancelled,
    AutoReleaseConfigured,
    ConditionMet,
    AutoReleased,
    DisputeOpened,
    DisputeInReview,
    DisputeResolved,
    DisputeClosed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TransactionCreated => "TRANSACTION_CREATED",
            EventKind::CounterpartyJoined => "COUNTERPARTY_JOINED",
            EventKind::DeliveryDetailsSubmitted => "DELIVERY_DETAILS_SUBMITTED",
            EventKind::PaymentRequested => "PAYMENT_REQUESTED",
            EventKind::PaymentConfirmed => "PAYMENT_CONFIRMED",
            EventKind::ShipmentConfirmed => "SHIPMENT_CONFIRMED",
            EventKind::TransactionCompleted => "TRANSACTION_COMPLETED",
            EventKind::TransactionCancelled => "TRANSACTION_CANCELLED",
            EventKind::AutoReleaseConfigured => "AUTO_RELEASE_CONFIGURED",
            EventKind::ConditionMet => "CONDITION_MET",
            EventKind::AutoReleased => "AUTO_RELEASED",
            EventKind::DisputeOpened => "DISPUTE_OPENED",
            EventKind::DisputeInReview => "DISPUTE_IN_REVIEW",
            EventKind::DisputeResolved => "DISPUTE_RESOLVED",
            EventKind::DisputeClosed => "DISPUTE_CLOSED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wallet / payment collaborator
///
/// Implementations must be idempotent per `transaction_id`.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Move held funds out of escrow to `to`
    async fn release_funds(
        &self,
        transaction_id: TransactionId,
        to: UserId,
        amount: Decimal,
        currency: &str,
    ) -> OpResult;

    /// Acknowledge the buyer's payment into escrow
    async fn record_payment(
        &self,
        transaction_id: TransactionId,
        method: &str,
        reference: &str,
    ) -> OpResult;

    /// Divide held funds between seller and buyer (dispute SPLIT remedy)
    async fn split_funds(
        &self,
        transaction_id: TransactionId,
        seller: UserId,
        seller_amount: Decimal,
        buyer: UserId,
        buyer_amount: Decimal,
        currency: &str,
    ) -> OpResult;
}

/// Notification collaborator (email / push / websocket fan-out)
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, user_id: UserId, kind: EventKind, payload: serde_json::Value);
}

/// Wallet that only logs; used when no ledger is wired in
pub struct LoggingWallet;

#[async_trait]
impl WalletAdapter for LoggingWallet {
    fn name(&self) -> &'static str {
        "logging-wallet"
    }

    async fn release_funds(
        &self,
        transaction_id: TransactionId,
        to: UserId,
        amount: Decimal,
        currency: &str,
    ) -> OpResult {
        info!(tx_id = %transaction_id, to, %amount, currency, "Release funds requested");
        OpResult::Pending
    }

    async fn record_payment(
        &self,
        transaction_id: TransactionId,
        method: &str,
        reference: &str,
    ) -> OpResult {
        info!(tx_id = %transaction_id, method, reference, "Payment recorded");
        OpResult::Success
    }

    async fn split_funds(
        &self,
        transaction_id: TransactionId,
        seller: UserId,
        seller_amount: Decimal,
        buyer: UserId,
        buyer_amount: Decimal,
        currency: &str,
    ) -> OpResult {
        info!(
            tx_id = %transaction_id,
            seller, %seller_amount, buyer, %buyer_amount, currency,
            "Split funds requested"
        );
        OpResult::Pending
    }
}

/// Notifier that emits structured log lines
pub struct LoggingNotifier;

#[async_trait]
impl NotificationAdapter for LoggingNotifier {
    fn name(&self) -> &'static str {
        "logging-notifier"
    }

    async fn notify(&self, user_id: UserId, kind: EventKind, payload: serde_json::Value) {
        info!(user_id, kind = %kind, payload = %payload, "Notify");
    }
}

/// Mock collaborators for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Release {
        pub transaction_id: TransactionId,
        pub to: UserId,
        pub amount: Decimal,
        pub currency: String,
    }

    pub struct MockWallet {
        releases: Mutex<Vec<Release>>,
        splits: Mutex<Vec<(UserId, Decimal, UserId, Decimal)>>,
        payment_count: AtomicUsize,
        fail_release: AtomicBool,
    }

    impl MockWallet {
        pub fn new() -> Self {
            Self {
                releases: Mutex::new(Vec::new()),
                splits: Mutex::new(Vec::new()),
                payment_count: AtomicUsize::new(0),
                fail_release: AtomicBool::new(false),
            }
        }

        pub fn set_fail_release(&self, fail: bool) {
            self.fail_release.store(fail, Ordering::SeqCst);
        }

        pub fn releases(&self) -> Vec<Release> {
            self.releases.lock().unwrap().clone()
        }

        pub fn release_count(&self) -> usize {
            self.releases.lock().unwrap().len()
        }

        pub fn splits(&self) -> Vec<(UserId, Decimal, UserId, Decimal)> {
            self.splits.lock().unwrap().clone()
        }

        pub fn payment_count(&self) -> usize {
            self.payment_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WalletAdapter for MockWallet {
        fn name(&self) -> &'static str {
            "mock-wallet"
        }

        async fn release_funds(
            &self,
            transaction_id: TransactionId,
            to: UserId,
            amount: Decimal,
            currency: &str,
        ) -> OpResult {
            self.releases.lock().unwrap().push(Release {
                transaction_id,
                to,
                amount,
                currency: currency.to_string(),
            });
            if self.fail_release.load(Ordering::SeqCst) {
                OpResult::Failed("Mock release failure".to_string())
            } else {
                OpResult::Success
            }
        }

        async fn record_payment(
            &self,
            _transaction_id: TransactionId,
            _method: &str,
            _reference: &str,
        ) -> OpResult {
            self.payment_count.fetch_add(1, Ordering::SeqCst);
            OpResult::Success
        }

        async fn split_funds(
            &self,
            _transaction_id: TransactionId,
            seller: UserId,
            seller_amount: Decimal,
            buyer: UserId,
            buyer_amount: Decimal,
            _currency: &str,
        ) -> OpResult {
            self.splits
                .lock()
                .unwrap()
                .push((seller, seller_amount, buyer, buyer_amount));
            OpResult::Success
        }
    }

    pub struct MockNotifier {
        sent: Mutex<Vec<(UserId, EventKind)>>,
    }

    impl MockNotifier {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn sent(&self) -> Vec<(UserId, EventKind)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn count(&self, kind: EventKind) -> usize {
            self.sent.lock().unwrap().iter().filter(|(_, k)| *k == kind).count()
        }
    }

    #[async_trait]
    impl NotificationAdapter for MockNotifier {
        fn name(&self) -> &'static str {
            "mock-notifier"
        }

        async fn notify(&self, user_id: UserId, kind: EventKind, _payload: serde_json::Value) {
            self.sent.lock().unwrap().push((user_id, kind));
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rust_decimal_macros::dec;

        #[tokio::test]
        async fn test_mock_wallet_records_releases() {
            let wallet = MockWallet::new();
            let tx_id = TransactionId::new();

            let result = wallet.release_funds(tx_id, 7, dec!(1050), "USD").await;
            assert!(result.is_success());
            assert_eq!(wallet.release_count(), 1);
            assert_eq!(wallet.releases()[0].amount, dec!(1050));
        }

        #[tokio::test]
        async fn test_mock_wallet_failure() {
            let wallet = MockWallet::new();
            wallet.set_fail_release(true);

            let result = wallet.release_funds(TransactionId::new(), 7, dec!(1), "USD").await;
            assert!(result.is_explicit_fail());
        }
    }
}

#[cfg(test)]
pub use mock::{MockNotifier, MockWallet};
