//! Escrow persistence port
//!
//! All transaction mutations go through [`EscrowStore::commit`], an atomic
//! compare-and-swap on the transaction `version`. A commit writes the new
//! record together with its history rows, dispute row and invitation
//! expiry, or nothing at all.
//!
//! Invitation redemption is a separate CAS on the invitation row
//! (ACTIVE -> USED) that runs before the transaction commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::dispute::Dispute;
use super::error::EscrowError;
use super::invitation::{Invitation, InvitationStatus};
use super::types::{DisputeId, Transaction, TransactionId, TransitionRecord, UserId};

/// One atomic write for a transaction
#[derive(Debug, Clone)]
pub struct Commit {
    /// New record; `version` must be `expected_version + 1`
    pub transaction: Transaction,
    pub expected_version: u64,
    pub history: Vec<TransitionRecord>,
    /// Inserted or replaced
    pub dispute: Option<Dispute>,
    /// Invitation code to move ACTIVE -> EXPIRED (cancel before join)
    pub expire_invitation: Option<String>,
}

impl Commit {
    pub fn new(transaction: Transaction, expected_version: u64) -> Self {
        Self {
            transaction,
            expected_version,
            history: Vec::new(),
            dispute: None,
            expire_invitation: None,
        }
    }

    pub fn with_history(mut self, history: Vec<TransitionRecord>) -> Self {
        self.history = history;
        self
    }

    pub fn with_dispute(mut self, dispute: Dispute) -> Self {
        self.dispute = Some(dispute);
        self
    }

    pub fn with_expired_invitation(mut self, code: impl Into<String>) -> Self {
        self.expire_invitation = Some(code.into());
        self
    }
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Persist a new transaction and its invitation
    async fn create(&self, tx: &Transaction, invitation: &Invitation) -> Result<(), EscrowError>;

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, EscrowError>;

    /// Transactions where the user is creator or counterparty, newest first
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, EscrowError>;

    /// Atomic CAS: apply only if the stored version equals `expected_version`
    ///
    /// Returns false if another writer got there first.
    async fn commit(&self, commit: Commit) -> Result<bool, EscrowError>;

    async fn history(&self, id: TransactionId) -> Result<Vec<TransitionRecord>, EscrowError>;

    async fn get_invitation(&self, code: &str) -> Result<Option<Invitation>, EscrowError>;

    async fn get_invitation_for(
        &self,
        id: TransactionId,
    ) -> Result<Option<Invitation>, EscrowError>;

    /// Atomic CAS ACTIVE -> USED; false if not ACTIVE or expired at `now`
    async fn redeem_invitation_if_active(
        &self,
        code: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError>;

    /// ACTIVE -> EXPIRED; false if not ACTIVE
    async fn expire_invitation(&self, code: &str) -> Result<bool, EscrowError>;

    async fn get_dispute(&self, id: DisputeId) -> Result<Option<Dispute>, EscrowError>;

    async fn disputes_for(&self, id: TransactionId) -> Result<Vec<Dispute>, EscrowError>;

    /// Transactions the scheduler should evaluate at `now`
    async fn auto_release_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionId>, EscrowError>;
}

/// Is `tx` worth an auto-release evaluation at `now`?
pub fn is_auto_release_candidate(tx: &Transaction, now: DateTime<Utc>) -> bool {
    if tx.status.is_terminal() || tx.disputed || !tx.auto_release.enabled() {
        return false;
    }
    let due = tx.auto_release.next_due().is_some_and(|at| at <= now);
    let ready = tx.auto_release.all_met() && tx.status.allows_auto_release() && !tx.funds_released;
    due || ready
}

/// In-memory store backed by DashMap
///
/// CAS is performed while holding the transaction's shard write lock.
#[derive(Default)]
pub struct MemoryStore {
    transactions: DashMap<TransactionId, Transaction>,
    invitations: DashMap<String, Invitation>,
    invitation_by_tx: DashMap<TransactionId, String>,
    disputes: DashMap<DisputeId, Dispute>,
    history: DashMap<TransactionId, Vec<TransitionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_invitation_for_test(&self, invitation: Invitation) {
        self.invitation_by_tx
            .insert(invitation.transaction_id, invitation.code.clone());
        self.invitations.insert(invitation.code.clone(), invitation);
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn create(&self, tx: &Transaction, invitation: &Invitation) -> Result<(), EscrowError> {
        if self.invitations.contains_key(&invitation.code) {
            return Err(EscrowError::System("invitation code collision".into()));
        }
        self.transactions.insert(tx.id, tx.clone());
        self.invitation_by_tx.insert(tx.id, invitation.code.clone());
        self.invitations
            .insert(invitation.code.clone(), invitation.clone());
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, EscrowError> {
        Ok(self.transactions.get(&id).map(|r| r.value().clone()))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, EscrowError> {
        let mut txs: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|r| r.party_of(user_id).is_some())
            .map(|r| r.value().clone())
            .collect();
        txs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(txs)
    }

    async fn commit(&self, commit: Commit) -> Result<bool, EscrowError> {
        let id = commit.transaction.id;
        let Some(mut entry) = self.transactions.get_mut(&id) else {
            return Err(EscrowError::TransactionNotFound(id.to_string()));
        };
        if entry.version != commit.expected_version {
            return Ok(false);
        }

        // Other maps are written while the transaction entry is locked
        if let Some(dispute) = commit.dispute {
            self.disputes.insert(dispute.id, dispute);
        }
        if let Some(code) = commit.expire_invitation
            && let Some(mut invitation) = self.invitations.get_mut(&code)
            && invitation.status == InvitationStatus::Active
        {
            invitation.status = InvitationStatus::Expired;
        }
        if !commit.history.is_empty() {
            self.history.entry(id).or_default().extend(commit.history);
        }
        *entry = commit.transaction;
        Ok(true)
    }

    async fn history(&self, id: TransactionId) -> Result<Vec<TransitionRecord>, EscrowError> {
        Ok(self
            .history
            .get(&id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn get_invitation(&self, code: &str) -> Result<Option<Invitation>, EscrowError> {
        Ok(self.invitations.get(code).map(|r| r.value().clone()))
    }

    async fn get_invitation_for(
        &self,
        id: TransactionId,
    ) -> Result<Option<Invitation>, EscrowError> {
        let code = match self.invitation_by_tx.get(&id) {
            Some(code) => code.value().clone(),
            None => return Ok(None),
        };
        self.get_invitation(&code).await
    }

    async fn redeem_invitation_if_active(
        &self,
        code: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError> {
        let Some(mut invitation) = self.invitations.get_mut(code) else {
            return Ok(false);
        };
        if invitation.status != InvitationStatus::Active || invitation.is_expired_at(now) {
            return Ok(false);
        }
        invitation.status = InvitationStatus::Used;
        invitation.used_by = Some(user_id);
        invitation.used_at = Some(now);
        Ok(true)
    }

    async fn expire_invitation(&self, code: &str) -> Result<bool, EscrowError> {
        let Some(mut invitation) = self.invitations.get_mut(code) else {
            return Ok(false);
        };
        if invitation.status != InvitationStatus::Active {
            return Ok(false);
        }
        invitation.status = InvitationStatus::Expired;
        Ok(true)
    }

    async fn get_dispute(&self, id: DisputeId) -> Result<Option<Dispute>, EscrowError> {
        Ok(self.disputes.get(&id).map(|r| r.value().clone()))
    }

    async fn disputes_for(&self, id: TransactionId) -> Result<Vec<Dispute>, EscrowError> {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .iter()
            .filter(|r| r.transaction_id == id)
            .map(|r| r.value().clone())
            .collect();
        disputes.sort_by_key(|d| d.created_at);
        Ok(disputes)
    }

    async fn auto_release_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionId>, EscrowError> {
        let mut ids: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|r| is_auto_release_candidate(r.value(), now))
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }
}
