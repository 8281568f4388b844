//! Escrow Service
//!
//! The only mutation entry point. Every operation follows the same shape:
//!
//! 1. Read the current record and its `version`
//! 2. Compute the next record through the transition table (pure)
//! 3. CAS-commit with `expected_version`; a lost race re-reads and reports
//!    what the winner left behind, or `CONFLICT`
//! 4. Dispatch wallet / notification effects AFTER the commit
//!
//! Collaborator failures in step 4 are logged and never undo step 3.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::adapters::{EventKind, NotificationAdapter, OpResult, WalletAdapter};
use super::clock::Clock;
use super::conditions::{ConditionFact, ConditionKind, PaymentCondition};
use super::dispute::{Dispute, DisputeKind, DisputeOutcome, DisputeRules};
use super::error::EscrowError;
use super::invitation::{Invitation, InvitationIssuer, InvitationStatus, normalize_code};
use super::machine::{self, Action, Effect, EscrowEvent, Transition};
use super::roles::RoleResolver;
use super::state::{CommercialRole, TransactionStatus};
use super::store::{Commit, EscrowStore};
use super::types::{Actor, DisputeId, Transaction, TransactionId, TransactionTerms, TransitionRecord, UserId};
use crate::config::EscrowConfig;

/// Fee rate precision (10^6 = 1,000,000)
pub const FEE_PRECISION: u64 = 1_000_000;

/// Join retries after the invitation is already consumed
const JOIN_CAS_RETRIES: usize = 3;

/// Fee for `price` at `rate` (10^6 precision), rounded to cents
pub fn calculate_fee(price: Decimal, rate: u64) -> Decimal {
    (price * Decimal::from(rate) / Decimal::from(FEE_PRECISION)).round_dp(2)
}

/// A computed, not yet committed, change
#[derive(Debug, Clone)]
struct Planned {
    transition: Transition,
    dispute: Option<Dispute>,
    expire_invitation: Option<String>,
}

impl Planned {
    fn with_dispute(mut self, dispute: Dispute) -> Self {
        self.dispute = Some(dispute);
        self
    }

    /// Nothing to write
    fn is_noop(&self) -> bool {
        self.transition.hops.is_empty()
            && self.transition.effects.is_empty()
            && self.dispute.is_none()
            && self.expire_invitation.is_none()
    }
}

impl From<Transition> for Planned {
    fn from(transition: Transition) -> Self {
        Self {
            transition,
            dispute: None,
            expire_invitation: None,
        }
    }
}

/// Data-only transition (no status change)
fn annotate(action: &'static str, tx: &Transaction, effects: Vec<Effect>) -> Transition {
    Transition {
        action,
        from: tx.status,
        hops: Vec::new(),
        effects,
    }
}

pub struct EscrowService {
    store: Arc<dyn EscrowStore>,
    wallet: Arc<dyn WalletAdapter>,
    notifier: Arc<dyn NotificationAdapter>,
    clock: Arc<dyn Clock>,
    issuer: InvitationIssuer,
    config: EscrowConfig,
}

impl EscrowService {
    pub fn new(
        store: Arc<dyn EscrowStore>,
        wallet: Arc<dyn WalletAdapter>,
        notifier: Arc<dyn NotificationAdapter>,
        clock: Arc<dyn Clock>,
        config: EscrowConfig,
    ) -> Self {
        let issuer = InvitationIssuer::new(
            store.clone(),
            config.invitation_ttl_days,
            config.invitation_code_len,
        );
        Self {
            store,
            wallet,
            notifier,
            clock,
            issuer,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn EscrowStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a PENDING transaction and its invitation
    pub async fn create_transaction(
        &self,
        creator_id: UserId,
        terms: TransactionTerms,
    ) -> Result<(Transaction, Invitation), EscrowError> {
        terms.validate()?;
        if terms.item_description.chars().count() > self.config.max_description_len {
            return Err(EscrowError::Validation(format!(
                "item description exceeds {} characters",
                self.config.max_description_len
            )));
        }
        if terms.price <= Decimal::ZERO || terms.price < self.config.min_price {
            return Err(EscrowError::Validation(format!(
                "price must be at least {}",
                self.config.min_price
            )));
        }
        if terms.fee.is_some_and(|fee| fee < Decimal::ZERO) {
            return Err(EscrowError::Validation("fee cannot be negative".into()));
        }

        let now = self.clock.now();
        machine::validate_conditions(&terms.auto_release, now)?;

        let fee = terms
            .fee
            .unwrap_or_else(|| calculate_fee(terms.price, self.config.fee_rate));
        let tx = Transaction::new(creator_id, &terms, fee, now);
        let invitation = self.issuer.issue(tx.id, now);

        self.store.create(&tx, &invitation).await?;
        info!(
            tx_id = %tx.id,
            creator_id,
            role = %tx.creator_role,
            total = %tx.total,
            currency = %tx.currency,
            "Transaction created"
        );

        self.notify(&tx, EventKind::TransactionCreated).await;
        Ok((tx, invitation))
    }

    // ========================================================================
    // Lifecycle events
    // ========================================================================

    /// Apply a participant event; returns the committed record
    pub async fn apply_event(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
        event: EscrowEvent,
    ) -> Result<Transaction, EscrowError> {
        match &event {
            EscrowEvent::Join { code } => {
                return self.join(Some(transaction_id), user_id, code).await;
            }
            EscrowEvent::Cancel { reason } => {
                let current = self.load(transaction_id).await?;
                if current.status.is_escrowed() {
                    // Funds are held: cancellation becomes a refund request
                    let (_, tx) = self
                        .open_dispute_of_kind(transaction_id, user_id, DisputeKind::RefundRequest, reason)
                        .await?;
                    return Ok(tx);
                }
            }
            _ => {}
        }

        let pending_code = match event.action() {
            Action::Cancel => self
                .store
                .get_invitation_for(transaction_id)
                .await?
                .filter(|inv| inv.status == InvitationStatus::Active)
                .map(|inv| inv.code),
            _ => None,
        };

        let now = self.clock.now();
        let (tx, _) = self
            .run(transaction_id, Actor::User(user_id), now, |tx, now| {
                let transition = machine::apply(tx, user_id, &event, now)?;
                let mut planned = Planned::from(transition);
                if planned.transition.from == TransactionStatus::Pending {
                    planned.expire_invitation = pending_code.clone();
                }
                Ok(planned)
            })
            .await?;

        Ok(self.try_auto_release(tx).await)
    }

    /// Join using only the code
    pub async fn join_by_code(&self, user_id: UserId, code: &str) -> Result<Transaction, EscrowError> {
        self.join(None, user_id, code).await
    }

    async fn join(
        &self,
        expected_tx: Option<TransactionId>,
        user_id: UserId,
        code: &str,
    ) -> Result<Transaction, EscrowError> {
        let now = self.clock.now();
        let invitation = self
            .store
            .get_invitation(&normalize_code(code))
            .await?
            .ok_or(EscrowError::CodeNotFound)?;
        if expected_tx.is_some_and(|id| id != invitation.transaction_id) {
            return Err(EscrowError::CodeNotFound);
        }
        self.issuer.ensure_redeemable(&invitation, now).await?;

        // Reject what we can before consuming the code
        let tx = self.load(invitation.transaction_id).await?;
        if tx.disputed {
            return Err(EscrowError::TransactionDisputed);
        }
        RoleResolver::check_joinable(&tx, user_id)?;

        self.issuer.redeem(code, user_id, now).await?;

        // The code is ours; only a concurrent cancel can still beat us
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .run(tx.id, Actor::User(user_id), now, |tx, now| {
                    machine::join(tx, user_id, now).map(Planned::from)
                })
                .await;
            match result {
                Err(EscrowError::Conflict) if attempt < JOIN_CAS_RETRIES => {
                    debug!(tx_id = %tx.id, attempt, "Join conflict, retrying");
                }
                Err(e) => {
                    error!(tx_id = %tx.id, user_id, error = %e, "Join failed after invitation was redeemed");
                    return Err(e);
                }
                Ok((tx, _)) => return Ok(tx),
            }
        }
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    pub async fn get_conditions(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<PaymentCondition>, EscrowError> {
        let tx = self.load(transaction_id).await?;
        Ok(tx.auto_release.conditions().to_vec())
    }

    /// Record an external fact (courier feed, buyer approval)
    ///
    /// DELIVERY_CONFIRMED comes from the buyer or the system; MANUAL_APPROVAL
    /// from a participant. TIME_BASED and DISPUTE_RESOLVED are internal.
    pub async fn record_fact(
        &self,
        transaction_id: TransactionId,
        actor: Actor,
        kind: ConditionKind,
    ) -> Result<Transaction, EscrowError> {
        let current = self.load(transaction_id).await?;
        let fact = match (kind, actor) {
            (ConditionKind::DeliveryConfirmed, Actor::System) => ConditionFact::DeliveryConfirmed,
            (ConditionKind::DeliveryConfirmed, Actor::User(user_id)) => {
                let participant = RoleResolver::resolve(&current, user_id)?;
                RoleResolver::require_role(&participant, CommercialRole::Buyer, "confirm_delivery")?;
                ConditionFact::DeliveryConfirmed
            }
            (ConditionKind::ManualApproval, Actor::User(user_id)) => {
                let participant = RoleResolver::resolve(&current, user_id)?;
                ConditionFact::ManualApproval {
                    approver: user_id,
                    is_buyer: participant.role == CommercialRole::Buyer,
                }
            }
            (ConditionKind::ManualApproval, Actor::System) => {
                return Err(EscrowError::Validation(
                    "manual approval must come from a participant".into(),
                ));
            }
            (ConditionKind::TimeBased | ConditionKind::DisputeResolved, _) => {
                return Err(EscrowError::Validation(format!(
                    "{} facts are recorded internally",
                    kind.as_str()
                )));
            }
        };

        let now = self.clock.now();
        let (tx, _) = self
            .run(transaction_id, actor, now, |tx, now| {
                if tx.status.is_terminal() {
                    return Err(EscrowError::invalid_state("record_fact", tx.status));
                }
                let newly_met = tx.auto_release.record_fact(&fact, now);
                if newly_met.is_empty() {
                    return Ok(Planned::from(annotate("record_fact", tx, Vec::new())));
                }
                tx.updated_at = now;
                info!(tx_id = %tx.id, fact = kind.as_str(), ?newly_met, "Conditions met");
                Ok(Planned::from(annotate(
                    "record_fact",
                    tx,
                    vec![Effect::Notify(EventKind::ConditionMet)],
                )))
            })
            .await?;

        Ok(self.try_auto_release(tx).await)
    }

    /// Scheduler entry point: evaluate TIME_BASED conditions of due candidates
    ///
    /// Returns how many transactions were auto-released.
    pub async fn evaluate_time_conditions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, EscrowError> {
        let candidates = self.store.auto_release_candidates(now, limit).await?;
        if candidates.is_empty() {
            debug!("No auto-release candidates");
            return Ok(0);
        }

        let mut released = 0;
        for id in candidates {
            match self.evaluate_transaction(id, now).await {
                Ok(tx) if tx.status == TransactionStatus::Completed && tx.funds_released => {
                    released += 1;
                }
                Ok(_) => {}
                Err(EscrowError::Conflict) => {
                    // A user-driven transition won; the next scan re-evaluates
                    debug!(tx_id = %id, "Evaluation lost a race");
                }
                Err(e) => warn!(tx_id = %id, error = %e, "Condition evaluation failed"),
            }
        }
        Ok(released)
    }

    /// Apply the clock fact to one transaction and auto-release if ready
    ///
    /// Condition update and release commit together under one CAS.
    pub async fn evaluate_transaction(
        &self,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transaction, EscrowError> {
        let (tx, planned) = self
            .run(transaction_id, Actor::System, now, |tx, now| {
                if tx.status.is_terminal() || tx.disputed {
                    return Ok(Planned::from(annotate("evaluate", tx, Vec::new())));
                }
                let newly_met = tx.auto_release.record_fact(&ConditionFact::Clock, now);
                let mut effects = Vec::new();
                if !newly_met.is_empty() {
                    tx.updated_at = now;
                    effects.push(Effect::Notify(EventKind::ConditionMet));
                }
                if release_ready(tx) {
                    let mut transition = machine::auto_release(tx, now)?;
                    effects.append(&mut transition.effects);
                    transition.effects = effects;
                    return Ok(Planned::from(transition));
                }
                Ok(Planned::from(annotate("evaluate", tx, effects)))
            })
            .await?;

        if planned.transition.to() == TransactionStatus::Completed {
            info!(tx_id = %tx.id, total = %tx.total, "Auto-released by scheduler");
        }
        Ok(tx)
    }

    /// Attempt a system release after a commit that may have completed the set
    ///
    /// Never fails the caller's (already committed) operation.
    async fn try_auto_release(&self, tx: Transaction) -> Transaction {
        if !release_ready(&tx) {
            return tx;
        }
        let now = self.clock.now();
        match self
            .run(tx.id, Actor::System, now, |tx, now| {
                machine::auto_release(tx, now).map(Planned::from)
            })
            .await
        {
            Ok((released, _)) => {
                info!(tx_id = %released.id, total = %released.total, "Auto-released");
                released
            }
            Err(e) => {
                debug!(tx_id = %tx.id, error = %e, "Auto-release skipped");
                match self.store.get(tx.id).await {
                    Ok(Some(fresh)) => fresh,
                    _ => tx,
                }
            }
        }
    }

    // ========================================================================
    // Disputes
    // ========================================================================

    pub async fn open_dispute(
        &self,
        transaction_id: TransactionId,
        raised_by: UserId,
        reason: &str,
    ) -> Result<Dispute, EscrowError> {
        let (dispute, _) = self
            .open_dispute_of_kind(transaction_id, raised_by, DisputeKind::General, reason)
            .await?;
        Ok(dispute)
    }

    async fn open_dispute_of_kind(
        &self,
        transaction_id: TransactionId,
        raised_by: UserId,
        kind: DisputeKind,
        reason: &str,
    ) -> Result<(Dispute, Transaction), EscrowError> {
        let now = self.clock.now();
        let (tx, planned) = self
            .run(transaction_id, Actor::User(raised_by), now, |tx, now| {
                let dispute = DisputeRules::open(tx, raised_by, kind, reason, now)?;
                let transition = annotate(
                    "open_dispute",
                    tx,
                    vec![Effect::Notify(EventKind::DisputeOpened)],
                );
                Ok(Planned::from(transition).with_dispute(dispute))
            })
            .await?;

        let dispute = planned
            .dispute
            .ok_or_else(|| EscrowError::System("dispute missing after commit".into()))?;
        info!(
            tx_id = %tx.id,
            dispute_id = %dispute.id,
            raised_by,
            kind = ?dispute.kind,
            "Dispute opened"
        );
        Ok((dispute, tx))
    }

    /// OPEN -> IN_REVIEW
    pub async fn mark_in_review(&self, dispute_id: DisputeId) -> Result<Dispute, EscrowError> {
        let dispute = self.load_dispute(dispute_id).await?;
        let now = self.clock.now();
        let (_, planned) = self
            .run(dispute.transaction_id, Actor::System, now, |tx, now| {
                let mut dispute = dispute.clone();
                DisputeRules::mark_in_review(&mut dispute, now)?;
                ensure_frozen_by(tx, &dispute)?;
                tx.updated_at = now;
                let transition = annotate(
                    "review_dispute",
                    tx,
                    vec![Effect::Notify(EventKind::DisputeInReview)],
                );
                Ok(Planned::from(transition).with_dispute(dispute))
            })
            .await?;
        planned
            .dispute
            .ok_or_else(|| EscrowError::System("dispute missing after commit".into()))
    }

    /// Resolve with a remedy; forces the transaction terminal and unfreezes it
    pub async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        outcome: DisputeOutcome,
        note: Option<String>,
    ) -> Result<(Dispute, Transaction), EscrowError> {
        let dispute = self.load_dispute(dispute_id).await?;
        let now = self.clock.now();
        let (tx, planned) = self
            .run(dispute.transaction_id, Actor::System, now, |tx, now| {
                let mut dispute = dispute.clone();
                DisputeRules::resolve(&mut dispute, outcome, note.clone(), now)?;
                ensure_frozen_by(tx, &dispute)?;
                let mut transition = machine::force_outcome(tx, outcome, now)?;
                tx.auto_release
                    .record_fact(&ConditionFact::DisputeResolved, now);
                transition
                    .effects
                    .push(Effect::Notify(EventKind::DisputeResolved));
                Ok(Planned::from(transition).with_dispute(dispute))
            })
            .await?;

        let dispute = planned
            .dispute
            .ok_or_else(|| EscrowError::System("dispute missing after commit".into()))?;
        info!(
            tx_id = %tx.id,
            dispute_id = %dispute.id,
            outcome = outcome.as_str(),
            status = %tx.status,
            "Dispute resolved"
        );
        Ok((dispute, tx))
    }

    /// Withdrawal by the raiser: no forced outcome, lifecycle resumes
    pub async fn close_dispute(
        &self,
        dispute_id: DisputeId,
        actor: UserId,
    ) -> Result<(Dispute, Transaction), EscrowError> {
        let dispute = self.load_dispute(dispute_id).await?;
        let now = self.clock.now();
        let (tx, planned) = self
            .run(dispute.transaction_id, Actor::User(actor), now, |tx, now| {
                let mut dispute = dispute.clone();
                DisputeRules::close(&mut dispute, actor, now)?;
                ensure_frozen_by(tx, &dispute)?;
                DisputeRules::unfreeze(tx, now);
                let mut effects = vec![Effect::Notify(EventKind::DisputeClosed)];
                if !tx
                    .auto_release
                    .record_fact(&ConditionFact::DisputeResolved, now)
                    .is_empty()
                {
                    effects.push(Effect::Notify(EventKind::ConditionMet));
                }
                Ok(Planned::from(annotate("close_dispute", tx, effects)).with_dispute(dispute))
            })
            .await?;

        let dispute = planned
            .dispute
            .ok_or_else(|| EscrowError::System("dispute missing after commit".into()))?;
        info!(tx_id = %tx.id, dispute_id = %dispute.id, "Dispute withdrawn");
        Ok((dispute, self.try_auto_release(tx).await))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>, EscrowError> {
        self.store.get(transaction_id).await
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, EscrowError> {
        self.store.list_for_user(user_id).await
    }

    pub async fn history(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<TransitionRecord>, EscrowError> {
        self.store.history(transaction_id).await
    }

    /// The transaction's invitation; only the creator may read the code
    pub async fn get_invitation(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
    ) -> Result<Option<Invitation>, EscrowError> {
        let tx = self.load(transaction_id).await?;
        if tx.creator_id != user_id {
            return Err(EscrowError::NotAParticipant(user_id));
        }
        self.store.get_invitation_for(transaction_id).await
    }

    pub async fn get_dispute(&self, dispute_id: DisputeId) -> Result<Option<Dispute>, EscrowError> {
        self.store.get_dispute(dispute_id).await
    }

    pub async fn disputes_for(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<Dispute>, EscrowError> {
        self.store.disputes_for(transaction_id).await
    }

    /// "Next action" helper for clients
    pub async fn available_actions(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
    ) -> Result<Vec<Action>, EscrowError> {
        let tx = self.load(transaction_id).await?;
        Ok(machine::available_actions(&tx, user_id))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, transaction_id: TransactionId) -> Result<Transaction, EscrowError> {
        self.store
            .get(transaction_id)
            .await?
            .ok_or_else(|| EscrowError::TransactionNotFound(transaction_id.to_string()))
    }

    async fn load_dispute(&self, dispute_id: DisputeId) -> Result<Dispute, EscrowError> {
        self.store
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| EscrowError::DisputeNotFound(dispute_id.to_string()))
    }

    /// Read, compute, CAS-commit, dispatch
    async fn run<F>(
        &self,
        transaction_id: TransactionId,
        actor: Actor,
        now: DateTime<Utc>,
        op: F,
    ) -> Result<(Transaction, Planned), EscrowError>
    where
        F: Fn(&mut Transaction, DateTime<Utc>) -> Result<Planned, EscrowError> + Send + Sync,
    {
        let current = self.load(transaction_id).await?;
        let mut next = current.clone();
        let planned = match op(&mut next, now) {
            Ok(planned) => planned,
            Err(e) => {
                debug!(tx_id = %transaction_id, %actor, status = %current.status, error = %e, "Transition rejected");
                return Err(e);
            }
        };
        if planned.is_noop() {
            return Ok((current, planned));
        }

        next.version = current.version + 1;
        let mut commit = Commit::new(next.clone(), current.version)
            .with_history(planned.transition.history(&next, actor, now));
        if let Some(dispute) = &planned.dispute {
            commit = commit.with_dispute(dispute.clone());
        }
        if let Some(code) = &planned.expire_invitation {
            commit = commit.with_expired_invitation(code.clone());
        }

        if !self.store.commit(commit).await? {
            warn!(
                tx_id = %transaction_id,
                expected_version = current.version,
                action = planned.transition.action,
                "Version conflict"
            );
            // Report the winner's state when it makes this action illegal
            let fresh = self.load(transaction_id).await?;
            let mut probe = fresh.clone();
            op(&mut probe, now)?;
            return Err(EscrowError::Conflict);
        }

        info!(
            tx_id = %transaction_id,
            %actor,
            event = planned.transition.action,
            from = %planned.transition.from,
            to = %planned.transition.to(),
            version = next.version,
            "Transition committed"
        );

        self.dispatch(&next, &planned.transition.effects).await;
        Ok((next, planned))
    }

    /// Post-commit side effects; failures are logged, never propagated
    async fn dispatch(&self, tx: &Transaction, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::RecordPayment { method, reference } => {
                    let result = self.wallet.record_payment(tx.id, method, reference).await;
                    self.log_wallet(tx, "record_payment", &result);
                }
                Effect::ReleaseFunds { to, amount } => {
                    let result = self
                        .wallet
                        .release_funds(tx.id, *to, *amount, &tx.currency)
                        .await;
                    self.log_wallet(tx, "release_funds", &result);
                }
                Effect::SplitFunds {
                    seller,
                    seller_amount,
                    buyer,
                    buyer_amount,
                } => {
                    let result = self
                        .wallet
                        .split_funds(tx.id, *seller, *seller_amount, *buyer, *buyer_amount, &tx.currency)
                        .await;
                    self.log_wallet(tx, "split_funds", &result);
                }
                Effect::Notify(kind) => self.notify(tx, *kind).await,
            }
        }
    }

    fn log_wallet(&self, tx: &Transaction, op: &'static str, result: &OpResult) {
        match result {
            OpResult::Success => debug!(tx_id = %tx.id, op, wallet = self.wallet.name(), "Wallet call succeeded"),
            OpResult::Pending => info!(tx_id = %tx.id, op, wallet = self.wallet.name(), "Wallet call pending"),
            OpResult::Failed(reason) => warn!(
                tx_id = %tx.id,
                op,
                wallet = self.wallet.name(),
                reason = %reason,
                "Wallet call failed after commit; collaborator must retry"
            ),
        }
    }

    async fn notify(&self, tx: &Transaction, kind: EventKind) {
        let payload = serde_json::json!({
            "transaction_id": tx.id,
            "status": tx.status,
            "version": tx.version,
            "disputed": tx.disputed,
        });
        for user_id in tx.participants() {
            self.notifier.notify(user_id, kind, payload.clone()).await;
        }
    }
}

/// The dispute row was read outside the CAS; the record must still be
/// frozen by it, or a concurrent close/resolve won
fn ensure_frozen_by(tx: &Transaction, dispute: &Dispute) -> Result<(), EscrowError> {
    if tx.disputed && tx.open_dispute_id == Some(dispute.id) {
        Ok(())
    } else {
        Err(EscrowError::Conflict)
    }
}

/// All conditions met, shipment confirmed, nothing released, not frozen
fn release_ready(tx: &Transaction) -> bool {
    !tx.disputed
        && !tx.funds_released
        && tx.status.allows_auto_release()
        && tx.auto_release.all_met()
}
