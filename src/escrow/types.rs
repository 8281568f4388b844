//! Escrow Core Types
//!
//! The `Transaction` aggregate and the value types that travel with it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::conditions::{ConditionSet, ConditionSpec};
use super::state::{CommercialRole, Party, TransactionStatus};

/// Platform user identifier
pub type UserId = u64;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Transaction ID - ULID, sortable by creation time
    TransactionId
);

ulid_id!(
    /// Dispute ID
    DisputeId
);

/// Who performed an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    User(UserId),
    /// Condition evaluator, scheduler or dispute override
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{}", id),
            Actor::System => write!(f, "system"),
        }
    }
}

/// Commercial terms submitted by the creator
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransactionTerms {
    #[validate(length(min = 1, message = "item description is required"))]
    pub item_description: String,
    #[validate(length(equal = 3, message = "currency must be an ISO 4217 code"))]
    pub currency: String,
    pub price: Decimal,
    /// Platform fee; computed from the configured rate when absent
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub use_courier: bool,
    pub creator_role: CommercialRole,
    #[serde(default)]
    pub auto_release: Vec<ConditionSpec>,
}

impl TransactionTerms {
    pub fn new(
        item_description: impl Into<String>,
        currency: impl Into<String>,
        price: Decimal,
        creator_role: CommercialRole,
    ) -> Self {
        Self {
            item_description: item_description.into(),
            currency: currency.into(),
            price,
            fee: None,
            use_courier: false,
            creator_role,
            auto_release: Vec::new(),
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_courier(mut self, use_courier: bool) -> Self {
        self.use_courier = use_courier;
        self
    }

    pub fn with_auto_release(mut self, conditions: Vec<ConditionSpec>) -> Self {
        self.auto_release = conditions;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DeliveryDetails {
    #[validate(length(min = 1, max = 200))]
    pub recipient_name: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShipmentInfo {
    #[validate(length(min = 1, max = 100))]
    pub carrier: String,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: String,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: String,
    pub reference: String,
    pub completed: bool,
}

/// The escrow transaction aggregate
///
/// Mutated only through the transition table in [`super::machine`];
/// `version` is bumped on every committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub version: u64,

    pub item_description: String,
    pub currency: String,
    pub price: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    pub use_courier: bool,

    pub creator_id: UserId,
    pub creator_role: CommercialRole,
    pub counterparty_id: Option<UserId>,
    pub counterparty_role: Option<CommercialRole>,

    pub status: TransactionStatus,

    pub delivery_details: Option<DeliveryDetails>,
    pub shipment: Option<ShipmentInfo>,
    pub payment: Option<PaymentInfo>,
    pub receipt_note: Option<String>,
    pub cancellation_reason: Option<String>,

    pub auto_release: ConditionSet,

    /// Derived flag: a dispute is OPEN or IN_REVIEW
    pub disputed: bool,
    pub open_dispute_id: Option<DisputeId>,
    pub funds_released: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a new transaction in PENDING state
    ///
    /// `fee` must already be resolved; total is fixed here.
    pub fn new(
        creator_id: UserId,
        terms: &TransactionTerms,
        fee: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            version: 0,
            item_description: terms.item_description.clone(),
            currency: terms.currency.to_uppercase(),
            price: terms.price,
            fee,
            total: terms.price + fee,
            use_courier: terms.use_courier,
            creator_id,
            creator_role: terms.creator_role,
            counterparty_id: None,
            counterparty_role: None,
            status: TransactionStatus::Pending,
            delivery_details: None,
            shipment: None,
            payment: None,
            receipt_note: None,
            cancellation_reason: None,
            auto_release: ConditionSet::new(terms.auto_release.clone()),
            disputed: false,
            open_dispute_id: None,
            funds_released: false,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Which side of the transaction a user is on, if any
    pub fn party_of(&self, user_id: UserId) -> Option<Party> {
        if user_id == self.creator_id {
            Some(Party::Creator)
        } else if self.counterparty_id == Some(user_id) {
            Some(Party::Counterparty)
        } else {
            None
        }
    }

    pub fn role_of_party(&self, party: Party) -> Option<CommercialRole> {
        match party {
            Party::Creator => Some(self.creator_role),
            Party::Counterparty => self.counterparty_role,
        }
    }

    pub fn user_with_role(&self, role: CommercialRole) -> Option<UserId> {
        if self.creator_role == role {
            Some(self.creator_id)
        } else if self.counterparty_role == Some(role) {
            self.counterparty_id
        } else {
            None
        }
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.user_with_role(CommercialRole::Buyer)
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.user_with_role(CommercialRole::Seller)
    }

    /// Both parties, creator first
    pub fn participants(&self) -> Vec<UserId> {
        let mut users = vec![self.creator_id];
        users.extend(self.counterparty_id);
        users
    }

    pub fn payment_completed(&self) -> bool {
        self.payment.as_ref().is_some_and(|p| p.completed)
    }
}

/// One committed hop in a transaction's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transaction_id: TransactionId,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub action: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms() -> TransactionTerms {
        TransactionTerms::new("Vintage camera", "usd", dec!(1000), CommercialRole::Seller)
            .with_fee(dec!(50))
    }

    #[test]
    fn test_new_transaction_total_and_status() {
        let tx = Transaction::new(7, &terms(), dec!(50), Utc::now());
        assert_eq!(tx.total, dec!(1050));
        assert_eq!(tx.currency, "USD");
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.version, 0);
        assert!(tx.counterparty_id.is_none());
        assert!(!tx.auto_release.enabled());
    }

    #[test]
    fn test_party_and_role_lookup() {
        let mut tx = Transaction::new(7, &terms(), dec!(50), Utc::now());
        assert_eq!(tx.party_of(7), Some(Party::Creator));
        assert_eq!(tx.party_of(8), None);
        assert_eq!(tx.seller_id(), Some(7));
        assert_eq!(tx.buyer_id(), None);

        tx.counterparty_id = Some(8);
        tx.counterparty_role = Some(CommercialRole::Buyer);
        assert_eq!(tx.party_of(8), Some(Party::Counterparty));
        assert_eq!(tx.buyer_id(), Some(8));
        assert_eq!(tx.participants(), vec![7, 8]);
    }

    #[test]
    fn test_terms_validation() {
        let bad = TransactionTerms::new("", "dollars", dec!(1), CommercialRole::Buyer);
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("item_description"));
        assert!(fields.contains_key("currency"));

        assert!(terms().validate().is_ok());
    }

    #[test]
    fn test_ids_roundtrip_through_strings() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<DisputeId>().is_err());
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::User(42).to_string(), "user:42");
        assert_eq!(Actor::System.to_string(), "system");
        assert_eq!(Actor::System.user_id(), None);
    }
}
