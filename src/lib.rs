//! Escrow Engine - transaction lifecycle and auto-release conditions
//!
//! # Modules
//!
//! - [`escrow`] - lifecycle state machine, invitations, conditions, disputes
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod escrow;
pub mod logging;

pub use escrow::{
    Action, Actor, CommercialRole, ConditionKind, ConditionSpec, Dispute, DisputeOutcome,
    EscrowError, EscrowEvent, EscrowService, EscrowStore, MemoryStore, Transaction, TransactionId,
    TransactionStatus, TransactionTerms, UserId,
};
