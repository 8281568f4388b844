//! Dispute Override Controller
//!
//! A dispute freezes its transaction (derived `disputed` flag) until it is
//! resolved or withdrawn. Resolution is the only way to force a terminal
//! state outside the happy path.
//!
//! ```text
//! OPEN → IN_REVIEW → RESOLVED (outcome forces COMPLETED / CANCELLED)
//!   ↘        ↘
//!    CLOSED (withdrawn by the raiser, no outcome)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::EscrowError;
use super::roles::RoleResolver;
use super::state::TransactionStatus;
use super::types::{DisputeId, Transaction, TransactionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    InReview,
    Resolved,
    Closed,
}

impl DisputeStatus {
    /// OPEN or IN_REVIEW: the transaction is frozen
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, DisputeStatus::Open | DisputeStatus::InReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "OPEN",
            DisputeStatus::InReview => "IN_REVIEW",
            DisputeStatus::Resolved => "RESOLVED",
            DisputeStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the dispute was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeKind {
    General,
    /// A cancel requested after funds were escrowed
    RefundRequest,
}

/// Remedy chosen when resolving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeOutcome {
    ReleaseToSeller,
    RefundToBuyer,
    /// Seller share in basis points (0..=10000); the rest goes to the buyer
    Split { seller_share_bps: u32 },
}

impl DisputeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeOutcome::ReleaseToSeller => "RELEASE_TO_SELLER",
            DisputeOutcome::RefundToBuyer => "REFUND_TO_BUYER",
            DisputeOutcome::Split { .. } => "SPLIT",
        }
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        if let DisputeOutcome::Split { seller_share_bps } = self
            && *seller_share_bps > 10_000
        {
            return Err(EscrowError::Validation(format!(
                "split share {} exceeds 10000 bps",
                seller_share_bps
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub transaction_id: TransactionId,
    pub raised_by: UserId,
    pub raised_against: UserId,
    pub kind: DisputeKind,
    pub reason: String,
    pub status: DisputeStatus,
    pub outcome: Option<DisputeOutcome>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub struct DisputeRules;

impl DisputeRules {
    /// Validate and build a new dispute; marks `tx` as disputed
    pub fn open(
        tx: &mut Transaction,
        raised_by: UserId,
        kind: DisputeKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Dispute, EscrowError> {
        RoleResolver::resolve(tx, raised_by)?;

        if tx.disputed {
            return Err(EscrowError::DisputeAlreadyOpen);
        }
        if tx.status.is_terminal() || tx.status == TransactionStatus::Pending {
            return Err(EscrowError::invalid_state("open_dispute", tx.status));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EscrowError::Validation("dispute reason is required".into()));
        }

        let raised_against = tx
            .participants()
            .into_iter()
            .find(|u| *u != raised_by)
            .ok_or(EscrowError::NotAParticipant(raised_by))?;

        let dispute = Dispute {
            id: DisputeId::new(),
            transaction_id: tx.id,
            raised_by,
            raised_against,
            kind,
            reason: reason.to_string(),
            status: DisputeStatus::Open,
            outcome: None,
            resolution_note: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };

        tx.disputed = true;
        tx.open_dispute_id = Some(dispute.id);
        tx.updated_at = now;
        Ok(dispute)
    }

    /// OPEN -> IN_REVIEW
    pub fn mark_in_review(dispute: &mut Dispute, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if dispute.status != DisputeStatus::Open {
            return Err(EscrowError::Validation(format!(
                "dispute is {}, expected OPEN",
                dispute.status
            )));
        }
        dispute.status = DisputeStatus::InReview;
        dispute.updated_at = now;
        Ok(())
    }

    /// OPEN/IN_REVIEW -> RESOLVED; the caller applies the forced transition
    pub fn resolve(
        dispute: &mut Dispute,
        outcome: DisputeOutcome,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        outcome.validate()?;
        if !dispute.status.is_active() {
            return Err(EscrowError::Validation(format!(
                "dispute is already {}",
                dispute.status
            )));
        }
        dispute.status = DisputeStatus::Resolved;
        dispute.outcome = Some(outcome);
        dispute.resolution_note = note;
        dispute.updated_at = now;
        dispute.resolved_at = Some(now);
        Ok(())
    }

    /// Withdrawal by the raiser: OPEN/IN_REVIEW -> CLOSED
    pub fn close(dispute: &mut Dispute, actor: UserId, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if dispute.raised_by != actor {
            return Err(EscrowError::Validation(
                "only the raiser can withdraw a dispute".into(),
            ));
        }
        if !dispute.status.is_active() {
            return Err(EscrowError::Validation(format!(
                "dispute is already {}",
                dispute.status
            )));
        }
        dispute.status = DisputeStatus::Closed;
        dispute.updated_at = now;
        dispute.resolved_at = Some(now);
        Ok(())
    }

    /// Clear the derived flag once the dispute left OPEN/IN_REVIEW
    pub fn unfreeze(tx: &mut Transaction, now: DateTime<Utc>) {
        tx.disputed = false;
        tx.open_dispute_id = None;
        tx.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::roles::RoleResolver;
    use crate::escrow::state::CommercialRole;
    use crate::escrow::types::TransactionTerms;
    use rust_decimal_macros::dec;

    fn joined() -> Transaction {
        let terms = TransactionTerms::new("Laptop", "USD", dec!(900), CommercialRole::Seller);
        let mut tx = Transaction::new(1, &terms, dec!(45), Utc::now());
        RoleResolver::assign_counterparty(&mut tx, 2);
        tx.status = TransactionStatus::WaitingForShipment;
        tx
    }

    #[test]
    fn test_open_freezes_transaction() {
        let mut tx = joined();
        let dispute =
            DisputeRules::open(&mut tx, 2, DisputeKind::General, "item not shipped", Utc::now())
                .unwrap();
        assert!(tx.disputed);
        assert_eq!(tx.open_dispute_id, Some(dispute.id));
        assert_eq!(dispute.raised_against, 1);
        assert_eq!(dispute.status, DisputeStatus::Open);
    }

    #[test]
    fn test_only_one_open_dispute() {
        let mut tx = joined();
        DisputeRules::open(&mut tx, 2, DisputeKind::General, "late", Utc::now()).unwrap();
        let err = DisputeRules::open(&mut tx, 1, DisputeKind::General, "bogus", Utc::now())
            .unwrap_err();
        assert_eq!(err, EscrowError::DisputeAlreadyOpen);
    }

    #[test]
    fn test_outsider_and_pending_rejected() {
        let mut tx = joined();
        let err =
            DisputeRules::open(&mut tx, 9, DisputeKind::General, "x", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "NOT_A_PARTICIPANT");

        tx.status = TransactionStatus::Pending;
        let err =
            DisputeRules::open(&mut tx, 1, DisputeKind::General, "x", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn test_resolve_and_close_lifecycle() {
        let mut tx = joined();
        let mut dispute =
            DisputeRules::open(&mut tx, 2, DisputeKind::General, "damaged", Utc::now()).unwrap();

        DisputeRules::mark_in_review(&mut dispute, Utc::now()).unwrap();
        assert_eq!(dispute.status, DisputeStatus::InReview);
        assert!(dispute.status.is_active());

        assert!(DisputeRules::close(&mut dispute, 1, Utc::now()).is_err());

        DisputeRules::resolve(
            &mut dispute,
            DisputeOutcome::RefundToBuyer,
            Some("photos confirm damage".into()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(dispute.status, DisputeStatus::Resolved);
        assert!(
            DisputeRules::resolve(&mut dispute, DisputeOutcome::ReleaseToSeller, None, Utc::now())
                .is_err()
        );
    }

    #[test]
    fn test_split_share_bounds() {
        assert!(DisputeOutcome::Split { seller_share_bps: 5_000 }.validate().is_ok());
        assert!(DisputeOutcome::Split { seller_share_bps: 10_001 }.validate().is_err());
    }
}
