//! Escrow Transaction Lifecycle
//!
//! Two-party buyer/seller escrow: creation, invitation-based counterparty
//! binding, the payment/shipment/receipt lifecycle, condition-based
//! auto-release and dispute override.
//!
//! # State Machine
//!
//! ```text
//! PENDING ──join──► ACTIVE ──┬─(courier) submit_delivery_details─► DELIVERY_DETAILS_IMPORTED ─┐
//!                            │                                                                  │
//!                            ├─ request_payment ─► WAITING_FOR_PAYMENT ◄─ request_payment ──────┤
//!                            │                           │                                      │
//!                            └─(no courier)──────────────┴── confirm_payment ◄──────────────────┘
//!                                                               │
//!                                                   PAYMENT_MADE → WAITING_FOR_SHIPMENT
//!                                                               │ confirm_shipment
//!                                     SHIPMENT_CONFIRMED → WAITING_FOR_BUYER_CONFIRMATION
//!                                                               │ confirm_receipt / auto-release
//!                                                           COMPLETED
//!
//! cancel: any non-terminal state before PAYMENT_MADE → CANCELLED
//!         escrowed states → refund dispute
//! dispute resolution: forces COMPLETED or CANCELLED
//! ```
//!
//! # Concurrency
//!
//! Every mutation is a version CAS on the transaction record
//! ([`store::EscrowStore::commit`]); invitation redemption is its own CAS
//! that runs first. Losers get `CONFLICT` or the error the winner's state
//! implies.

pub mod adapters;
pub mod clock;
pub mod conditions;
pub mod db;
pub mod dispute;
pub mod error;
pub mod invitation;
pub mod machine;
pub mod roles;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;


pub use adapters::{
    EventKind, LoggingNotifier, LoggingWallet, NotificationAdapter, OpResult, WalletAdapter,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conditions::{ConditionKind, ConditionSet, ConditionSpec, PaymentCondition};
pub use db::PgEscrowStore;
pub use dispute::{Dispute, DisputeKind, DisputeOutcome, DisputeStatus};
pub use error::EscrowError;
pub use invitation::{Invitation, InvitationStatus};
pub use machine::{Action, EscrowEvent};
pub use service::{EscrowService, calculate_fee};
pub use state::{CommercialRole, Party, TransactionStatus};
pub use store::{EscrowStore, MemoryStore};
pub use types::{
    Actor, DeliveryDetails, DisputeId, ShipmentInfo, Transaction, TransactionId, TransactionTerms,
    TransitionRecord, UserId,
};
pub use worker::{AutoReleaseWorker, WorkerConfig};
