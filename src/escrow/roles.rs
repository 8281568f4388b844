//! Role Assignment Resolver
//!
//! Maps an acting user onto a transaction side (creator / counterparty) and
//! the commercial role stored for that side. The buyer/seller pairing is
//! fixed at creation: the counterparty always gets the complement.

use super::error::EscrowError;
use super::state::{CommercialRole, Party, TransactionStatus};
use super::types::{Transaction, UserId};

/// Resolved identity of an acting participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub party: Party,
    pub role: CommercialRole,
}

pub struct RoleResolver;

impl RoleResolver {
    /// Resolve `user_id` to a participant or fail with `NOT_A_PARTICIPANT`
    pub fn resolve(tx: &Transaction, user_id: UserId) -> Result<Participant, EscrowError> {
        let party = tx
            .party_of(user_id)
            .ok_or(EscrowError::NotAParticipant(user_id))?;
        let role = tx
            .role_of_party(party)
            .ok_or(EscrowError::NotAParticipant(user_id))?;
        Ok(Participant {
            user_id,
            party,
            role,
        })
    }

    /// Require a specific commercial role for `action`
    pub fn require_role(
        participant: &Participant,
        required: CommercialRole,
        action: &'static str,
    ) -> Result<(), EscrowError> {
        if participant.role != required {
            return Err(EscrowError::RoleViolation { action, required });
        }
        Ok(())
    }

    /// Validate that `user_id` may take the counterparty slot
    ///
    /// Returns the role the counterparty will be assigned.
    pub fn check_joinable(tx: &Transaction, user_id: UserId) -> Result<CommercialRole, EscrowError> {
        // A filled slot means the code was consumed, whatever the status now
        if tx.counterparty_id.is_some() {
            return Err(EscrowError::CodeUsed);
        }
        if tx.status != TransactionStatus::Pending {
            return Err(EscrowError::invalid_state("join", tx.status));
        }
        if user_id == tx.creator_id {
            return Err(EscrowError::Validation(
                "creator cannot join their own transaction".to_string(),
            ));
        }
        Ok(tx.creator_role.complement())
    }

    /// Assign the counterparty slot
    pub fn assign_counterparty(tx: &mut Transaction, user_id: UserId) {
        tx.counterparty_id = Some(user_id);
        tx.counterparty_role = Some(tx.creator_role.complement());
    }
}
