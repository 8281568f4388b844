//! Transaction State Machine
//!
//! The single transition table (state × action → path or error). Every
//! caller - service, scheduler, dispute override, UI "next action" helper -
//! goes through [`Action::legal_from`] and [`check`], so the rules live in
//! exactly one place.
//!
//! ```text
//! PENDING → ACTIVE ─┬─(courier)→ WAITING_FOR_DELIVERY_DETAILS → DELIVERY_DETAILS_IMPORTED ─┐
//!                   │                                                                     ↓
//!                   └──────────────────────────────→ (WAITING_FOR_PAYMENT) → PAYMENT_MADE
//!                                                                                         ↓
//!   COMPLETED ← WAITING_FOR_BUYER_CONFIRMATION ← SHIPMENT_CONFIRMED ← WAITING_FOR_SHIPMENT
//!
//! CANCELLED: from any non-terminal state before PAYMENT_MADE
//! ```
//!
//! Functions here are pure: they mutate the in-memory record and return the
//! hops and side effects. Persisting (with the version check) and
//! dispatching effects is the service's job.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::adapters::EventKind;
use super::conditions::ConditionSpec;
use super::dispute::DisputeOutcome;
use super::error::EscrowError;
use super::roles::{Participant, RoleResolver};
use super::state::{CommercialRole, TransactionStatus};
use super::types::{
    Actor, DeliveryDetails, PaymentInfo, ShipmentInfo, Transaction, TransitionRecord, UserId,
};

/// Lifecycle events accepted by `apply_event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowEvent {
    Join {
        code: String,
    },
    SubmitDeliveryDetails(DeliveryDetails),
    RequestPayment,
    ConfirmPayment {
        method: String,
        reference: String,
    },
    ConfirmShipment(ShipmentInfo),
    ConfirmReceipt {
        #[serde(default)]
        condition: Option<String>,
    },
    Cancel {
        reason: String,
    },
    ConfigureAutoRelease {
        conditions: Vec<ConditionSpec>,
    },
}

impl EscrowEvent {
    pub fn action(&self) -> Action {
        match self {
            EscrowEvent::Join { .. } => Action::Join,
            EscrowEvent::SubmitDeliveryDetails(_) => Action::SubmitDeliveryDetails,
            EscrowEvent::RequestPayment => Action::RequestPayment,
            EscrowEvent::ConfirmPayment { .. } => Action::ConfirmPayment,
            EscrowEvent::ConfirmShipment(_) => Action::ConfirmShipment,
            EscrowEvent::ConfirmReceipt { .. } => Action::ConfirmReceipt,
            EscrowEvent::Cancel { .. } => Action::Cancel,
            EscrowEvent::ConfigureAutoRelease { .. } => Action::ConfigureAutoRelease,
        }
    }
}

/// Payload-free action tags; the rows of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Join,
    SubmitDeliveryDetails,
    RequestPayment,
    ConfirmPayment,
    ConfirmShipment,
    ConfirmReceipt,
    Cancel,
    ConfigureAutoRelease,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Join,
        Action::SubmitDeliveryDetails,
        Action::RequestPayment,
        Action::ConfirmPayment,
        Action::ConfirmShipment,
        Action::ConfirmReceipt,
        Action::Cancel,
        Action::ConfigureAutoRelease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Join => "join",
            Action::SubmitDeliveryDetails => "submit_delivery_details",
            Action::RequestPayment => "request_payment",
            Action::ConfirmPayment => "confirm_payment",
            Action::ConfirmShipment => "confirm_shipment",
            Action::ConfirmReceipt => "confirm_receipt",
            Action::Cancel => "cancel",
            Action::ConfigureAutoRelease => "configure_auto_release",
        }
    }

    /// The one commercial role allowed to perform this action
    pub fn required_role(&self) -> Option<CommercialRole> {
        match self {
            Action::SubmitDeliveryDetails
            | Action::ConfirmPayment
            | Action::ConfirmReceipt
            | Action::ConfigureAutoRelease => Some(CommercialRole::Buyer),
            Action::RequestPayment | Action::ConfirmShipment => Some(CommercialRole::Seller),
            Action::Join | Action::Cancel => None,
        }
    }

    /// Is this action legal from `status`?
    pub fn legal_from(&self, status: TransactionStatus, use_courier: bool) -> bool {
        use TransactionStatus::*;
        match (self, status) {
            (Action::Join, Pending) => true,
            (Action::SubmitDeliveryDetails, Active | WaitingForDeliveryDetails) => use_courier,
            (Action::RequestPayment, Active) => !use_courier,
            (Action::RequestPayment, DeliveryDetailsImported) => true,
            (Action::ConfirmPayment, Active) => !use_courier,
            (Action::ConfirmPayment, WaitingForPayment | DeliveryDetailsImported) => true,
            (Action::ConfirmShipment, WaitingForShipment) => true,
            (Action::ConfirmReceipt, WaitingForBuyerConfirmation) => true,
            (Action::Cancel | Action::ConfigureAutoRelease, s) => {
                !s.is_terminal() && !s.is_escrowed()
            }
            _ => false,
        }
    }

    /// States visited when the action is applied, in order
    fn path(&self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            Action::Join => &[Active],
            Action::SubmitDeliveryDetails => &[WaitingForDeliveryDetails, DeliveryDetailsImported],
            Action::RequestPayment => &[WaitingForPayment],
            Action::ConfirmPayment => &[PaymentMade, WaitingForShipment],
            Action::ConfirmShipment => &[ShipmentConfirmed, WaitingForBuyerConfirmation],
            Action::ConfirmReceipt => &[Completed],
            Action::Cancel => &[Cancelled],
            Action::ConfigureAutoRelease => &[],
        }
    }

    fn notification(&self) -> EventKind {
        match self {
            Action::Join => EventKind::CounterpartyJoined,
            Action::SubmitDeliveryDetails => EventKind::DeliveryDetailsSubmitted,
            Action::RequestPayment => EventKind::PaymentRequested,
            Action::ConfirmPayment => EventKind::PaymentConfirmed,
            Action::ConfirmShipment => EventKind::ShipmentConfirmed,
            Action::ConfirmReceipt => EventKind::TransactionCompleted,
            Action::Cancel => EventKind::TransactionCancelled,
            Action::ConfigureAutoRelease => EventKind::AutoReleaseConfigured,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side effects dispatched after commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RecordPayment {
        method: String,
        reference: String,
    },
    ReleaseFunds {
        to: UserId,
        amount: Decimal,
    },
    SplitFunds {
        seller: UserId,
        seller_amount: Decimal,
        buyer: UserId,
        buyer_amount: Decimal,
    },
    /// Notify every participant
    Notify(EventKind),
}

/// Result of applying one action to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub action: &'static str,
    pub from: TransactionStatus,
    /// States entered, in order; empty when only data changed
    pub hops: Vec<TransactionStatus>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn new(action: &'static str, from: TransactionStatus) -> Self {
        Self {
            action,
            from,
            hops: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn to(&self) -> TransactionStatus {
        self.hops.last().copied().unwrap_or(self.from)
    }

    /// Per-hop history rows
    pub fn history(&self, tx: &Transaction, actor: Actor, at: DateTime<Utc>) -> Vec<TransitionRecord> {
        let mut from = self.from;
        self.hops
            .iter()
            .map(|to| {
                let record = TransitionRecord {
                    transaction_id: tx.id,
                    from,
                    to: *to,
                    action: self.action.to_string(),
                    actor,
                    at,
                };
                from = *to;
                record
            })
            .collect()
    }
}

/// Guard for a participant-driven action (everything except `join`)
///
/// Order: participant, dispute freeze, state, role.
pub fn check(tx: &Transaction, user_id: UserId, action: Action) -> Result<Participant, EscrowError> {
    let participant = RoleResolver::resolve(tx, user_id)?;
    if tx.disputed {
        return Err(EscrowError::TransactionDisputed);
    }
    if !action.legal_from(tx.status, tx.use_courier) {
        return Err(EscrowError::invalid_state(action.as_str(), tx.status));
    }
    if let Some(required) = action.required_role() {
        RoleResolver::require_role(&participant, required, action.as_str())?;
    }
    Ok(participant)
}

fn enter(tx: &mut Transaction, transition: &mut Transition, action: Action, now: DateTime<Utc>) {
    for state in action.path() {
        if *state != tx.status {
            transition.hops.push(*state);
            tx.status = *state;
        }
    }
    tx.updated_at = now;
    transition.effects.push(Effect::Notify(action.notification()));
}

/// Assign the counterparty; the invitation must already be redeemed
pub fn join(tx: &mut Transaction, user_id: UserId, now: DateTime<Utc>) -> Result<Transition, EscrowError> {
    if tx.disputed {
        return Err(EscrowError::TransactionDisputed);
    }
    RoleResolver::check_joinable(tx, user_id)?;

    let mut transition = Transition::new(Action::Join.as_str(), tx.status);
    RoleResolver::assign_counterparty(tx, user_id);
    enter(tx, &mut transition, Action::Join, now);
    Ok(transition)
}

/// Apply a participant event to `tx`
pub fn apply(
    tx: &mut Transaction,
    user_id: UserId,
    event: &EscrowEvent,
    now: DateTime<Utc>,
) -> Result<Transition, EscrowError> {
    let action = event.action();
    let mut transition = match event {
        // The joiner is not a participant yet
        EscrowEvent::Join { .. } => return join(tx, user_id, now),
        _ => {
            check(tx, user_id, action)?;
            Transition::new(action.as_str(), tx.status)
        }
    };

    match event {
        // Join returned above; RequestPayment has no payload
        EscrowEvent::Join { .. } | EscrowEvent::RequestPayment => {}
        EscrowEvent::SubmitDeliveryDetails(details) => {
            details.validate()?;
            tx.delivery_details = Some(details.clone());
        }
        EscrowEvent::ConfirmPayment { method, reference } => {
            if method.trim().is_empty() || reference.trim().is_empty() {
                return Err(EscrowError::Validation(
                    "payment method and reference are required".into(),
                ));
            }
            tx.payment = Some(PaymentInfo {
                method: method.trim().to_string(),
                reference: reference.trim().to_string(),
                completed: true,
            });
            tx.paid_at = Some(now);
            transition.effects.push(Effect::RecordPayment {
                method: method.trim().to_string(),
                reference: reference.trim().to_string(),
            });
        }
        EscrowEvent::ConfirmShipment(info) => {
            info.validate()?;
            tx.shipment = Some(info.clone());
            tx.shipped_at = Some(now);
        }
        EscrowEvent::ConfirmReceipt { condition } => {
            let seller = tx
                .seller_id()
                .ok_or_else(|| EscrowError::System("seller missing after join".into()))?;
            tx.receipt_note = condition.clone();
            tx.delivered_at = Some(now);
            tx.completed_at = Some(now);
            tx.funds_released = true;
            transition.effects.push(Effect::ReleaseFunds {
                to: seller,
                amount: tx.total,
            });
        }
        EscrowEvent::Cancel { reason } => {
            if reason.trim().is_empty() {
                return Err(EscrowError::Validation("cancellation reason is required".into()));
            }
            tx.cancellation_reason = Some(reason.trim().to_string());
            tx.cancelled_at = Some(now);
        }
        EscrowEvent::ConfigureAutoRelease { conditions } => {
            validate_conditions(conditions, now)?;
            tx.auto_release = tx.auto_release.reconfigure(conditions.clone())?;
        }
    }

    enter(tx, &mut transition, action, now);
    Ok(transition)
}

/// Reject TIME_BASED conditions already in the past
pub fn validate_conditions(conditions: &[ConditionSpec], now: DateTime<Utc>) -> Result<(), EscrowError> {
    for spec in conditions {
        if let ConditionSpec::TimeBased { release_at } = spec
            && *release_at <= now
        {
            return Err(EscrowError::Validation(format!(
                "release date {} is not in the future",
                release_at
            )));
        }
    }
    Ok(())
}

/// System-attributed release once every configured condition is met
///
/// Never skips shipment: only legal from SHIPMENT_CONFIRMED or
/// WAITING_FOR_BUYER_CONFIRMATION.
pub fn auto_release(tx: &mut Transaction, now: DateTime<Utc>) -> Result<Transition, EscrowError> {
    if tx.disputed {
        return Err(EscrowError::TransactionDisputed);
    }
    if !tx.status.allows_auto_release() || tx.funds_released {
        return Err(EscrowError::invalid_state("auto_release", tx.status));
    }
    if !tx.auto_release.all_met() {
        return Err(EscrowError::Validation(
            "auto-release conditions are not all met".into(),
        ));
    }
    let seller = tx
        .seller_id()
        .ok_or_else(|| EscrowError::System("seller missing after join".into()))?;

    let mut transition = Transition::new("auto_release", tx.status);
    tx.completed_at = Some(now);
    tx.delivered_at.get_or_insert(now);
    tx.funds_released = true;
    tx.status = TransactionStatus::Completed;
    tx.updated_at = now;
    transition.hops.push(TransactionStatus::Completed);
    transition.effects.push(Effect::ReleaseFunds {
        to: seller,
        amount: tx.total,
    });
    transition.effects.push(Effect::Notify(EventKind::AutoReleased));
    Ok(transition)
}

/// Forced terminal transition from a resolved dispute
///
/// Funds only move when the buyer actually paid into escrow.
pub fn force_outcome(
    tx: &mut Transaction,
    outcome: DisputeOutcome,
    now: DateTime<Utc>,
) -> Result<Transition, EscrowError> {
    if tx.status.is_terminal() {
        return Err(EscrowError::invalid_state("resolve_dispute", tx.status));
    }
    let seller = tx.seller_id();
    let buyer = tx.buyer_id();
    let funded = tx.payment_completed() && !tx.funds_released;

    let mut transition = Transition::new("dispute_override", tx.status);
    let target = match outcome {
        DisputeOutcome::ReleaseToSeller => {
            if funded && let Some(seller) = seller {
                transition.effects.push(Effect::ReleaseFunds {
                    to: seller,
                    amount: tx.total,
                });
            }
            TransactionStatus::Completed
        }
        DisputeOutcome::RefundToBuyer => {
            if funded && let Some(buyer) = buyer {
                transition.effects.push(Effect::ReleaseFunds {
                    to: buyer,
                    amount: tx.total,
                });
            }
            TransactionStatus::Cancelled
        }
        DisputeOutcome::Split { seller_share_bps } => match (funded, seller, buyer) {
            (true, Some(seller), Some(buyer)) => {
                let seller_amount = (tx.total * Decimal::from(seller_share_bps)
                    / Decimal::from(10_000u32))
                .round_dp(2);
                transition.effects.push(Effect::SplitFunds {
                    seller,
                    seller_amount,
                    buyer,
                    buyer_amount: tx.total - seller_amount,
                });
                TransactionStatus::Completed
            }
            // Nothing held, nothing to split
            _ => TransactionStatus::Cancelled,
        },
    };

    if funded {
        tx.funds_released = true;
    }
    match target {
        TransactionStatus::Completed => tx.completed_at = Some(now),
        _ => tx.cancelled_at = Some(now),
    }
    tx.status = target;
    tx.disputed = false;
    tx.open_dispute_id = None;
    tx.updated_at = now;
    transition.hops.push(target);
    transition.effects.push(Effect::Notify(match target {
        TransactionStatus::Completed => EventKind::TransactionCompleted,
        _ => EventKind::TransactionCancelled,
    }));
    Ok(transition)
}

/// Actions `user_id` may take right now ("next action" helper for clients)
pub fn available_actions(tx: &Transaction, user_id: UserId) -> Vec<Action> {
    Action::ALL
        .into_iter()
        .filter(|action| match action {
            Action::Join => {
                !tx.disputed
                    && tx.status == TransactionStatus::Pending
                    && tx.counterparty_id.is_none()
                    && user_id != tx.creator_id
            }
            _ => check(tx, user_id, *action).is_ok(),
        })
        .collect()
}
