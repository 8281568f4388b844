//! Invitation Issuer
//!
//! One single-use, time-limited code per transaction. The code binds the
//! unassigned counterparty slot; redemption is an atomic ACTIVE -> USED
//! check-and-set performed by the store before the transaction itself is
//! touched.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::EscrowError;
use super::store::EscrowStore;
use super::types::{TransactionId, UserId};

/// Unambiguous uppercase alphabet (no 0/O, 1/I), 5 bits per character
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const DEFAULT_TTL_DAYS: i64 = 7;
pub const DEFAULT_CODE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    Active,
    Used,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Active => "ACTIVE",
            InvitationStatus::Used => "USED",
            InvitationStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(InvitationStatus::Active),
            "USED" => Some(InvitationStatus::Used),
            "EXPIRED" => Some(InvitationStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub code: String,
    pub transaction_id: TransactionId,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_by: Option<UserId>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Invitation {
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Classify why this invitation cannot be redeemed at `now`, if it can't
    pub fn rejection(&self, now: DateTime<Utc>) -> Option<EscrowError> {
        match self.status {
            InvitationStatus::Used => Some(EscrowError::CodeUsed),
            InvitationStatus::Expired => Some(EscrowError::CodeExpired),
            InvitationStatus::Active if self.is_expired_at(now) => Some(EscrowError::CodeExpired),
            InvitationStatus::Active => None,
        }
    }
}

/// Normalize user-typed codes (whitespace, lowercase)
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub struct InvitationIssuer {
    store: Arc<dyn EscrowStore>,
    ttl: Duration,
    code_len: usize,
}

impl InvitationIssuer {
    pub fn new(store: Arc<dyn EscrowStore>, ttl_days: i64, code_len: usize) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
            code_len,
        }
    }

    /// Build a fresh ACTIVE invitation; persisted together with its transaction
    pub fn issue(&self, transaction_id: TransactionId, now: DateTime<Utc>) -> Invitation {
        Invitation {
            code: generate_code(self.code_len),
            transaction_id,
            status: InvitationStatus::Active,
            created_at: now,
            expires_at: now + self.ttl,
            used_by: None,
            used_at: None,
        }
    }

    /// Reject a USED or EXPIRED code; a lapsed ACTIVE code is expired in place
    pub async fn ensure_redeemable(
        &self,
        invitation: &Invitation,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        let Some(err) = invitation.rejection(now) else {
            return Ok(());
        };
        if invitation.status == InvitationStatus::Active {
            self.store.expire_invitation(&invitation.code).await?;
            info!(code = %invitation.code, tx_id = %invitation.transaction_id, "Invitation expired on redemption attempt");
        }
        Err(err)
    }

    /// Atomically consume `code` for `user_id`
    ///
    /// Exactly one concurrent caller can succeed; the others observe
    /// `CODE_USED`. Expired codes are rejected even if still ACTIVE.
    pub async fn redeem(
        &self,
        code: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Invitation, EscrowError> {
        let code = normalize_code(code);
        let invitation = self
            .store
            .get_invitation(&code)
            .await?
            .ok_or(EscrowError::CodeNotFound)?;

        self.ensure_redeemable(&invitation, now).await?;

        if !self
            .store
            .redeem_invitation_if_active(&code, user_id, now)
            .await?
        {
            // Lost the race - report what the winner left behind
            let current = self
                .store
                .get_invitation(&code)
                .await?
                .ok_or(EscrowError::CodeNotFound)?;
            debug!(code = %code, status = %current.status, "Invitation CAS lost");
            return Err(current.rejection(now).unwrap_or(EscrowError::CodeUsed));
        }

        info!(code = %code, tx_id = %invitation.transaction_id, user_id, "Invitation redeemed");
        Ok(Invitation {
            status: InvitationStatus::Used,
            used_by: Some(user_id),
            used_at: Some(now),
            ..invitation
        })
    }
}

fn generate_code(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::store::MemoryStore;
    use std::collections::HashSet;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn issuer(store: Arc<MemoryStore>) -> InvitationIssuer {
        InvitationIssuer::new(store, DEFAULT_TTL_DAYS, DEFAULT_CODE_LEN)
    }

    #[test]
    fn test_codes_are_unpredictable_and_well_formed() {
        let codes: HashSet<String> = (0..1000).map(|_| generate_code(12)).collect();
        assert_eq!(codes.len(), 1000);
        for code in &codes {
            assert_eq!(code.len(), 12);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_issue_sets_seven_day_expiry() {
        let store = Arc::new(MemoryStore::new());
        let inv = issuer(store).issue(TransactionId::new(), t0());
        assert_eq!(inv.status, InvitationStatus::Active);
        assert_eq!(inv.expires_at, t0() + Duration::days(7));
        assert!(!inv.is_expired_at(t0() + Duration::days(7)));
        assert!(inv.is_expired_at(t0() + Duration::days(8)));
    }

    #[tokio::test]
    async fn test_redeem_once() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone());
        let inv = issuer.issue(TransactionId::new(), t0());
        store.insert_invitation_for_test(inv.clone());

        let redeemed = issuer
            .redeem(&inv.code.to_lowercase(), 2, t0())
            .await
            .unwrap();
        assert_eq!(redeemed.status, InvitationStatus::Used);
        assert_eq!(redeemed.used_by, Some(2));

        let err = issuer.redeem(&inv.code, 3, t0()).await.unwrap_err();
        assert_eq!(err, EscrowError::CodeUsed);
    }

    #[tokio::test]
    async fn test_redeem_expired_code() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone());
        let inv = issuer.issue(TransactionId::new(), t0());
        store.insert_invitation_for_test(inv.clone());

        let err = issuer
            .redeem(&inv.code, 2, t0() + Duration::days(8))
            .await
            .unwrap_err();
        assert_eq!(err, EscrowError::CodeExpired);

        let stored = store.get_invitation(&inv.code).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);
        assert!(stored.used_by.is_none());
    }

    #[tokio::test]
    async fn test_redeem_unknown_code() {
        let store = Arc::new(MemoryStore::new());
        let err = issuer(store).redeem("NOPE", 2, t0()).await.unwrap_err();
        assert_eq!(err, EscrowError::CodeNotFound);
    }
}
