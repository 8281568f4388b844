//! Escrow Lifecycle State Definitions
//!
//! State IDs are stable and used for PostgreSQL storage (SMALLINT).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction lifecycle states
///
/// Terminal states: COMPLETED (100), CANCELLED (-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionStatus {
    /// Created, waiting for the counterparty to redeem the invitation
    Pending = 0,

    /// Both parties assigned
    Active = 10,

    /// Courier flow only: buyer is providing delivery details
    WaitingForDeliveryDetails = 20,

    /// Courier flow only: delivery details stored
    DeliveryDetailsImported = 30,

    /// Seller requested payment
    WaitingForPayment = 40,

    /// Buyer paid - funds are HELD by the platform
    PaymentMade = 50,

    WaitingForShipment = 60,

    ShipmentConfirmed = 70,

    WaitingForBuyerConfirmation = 80,

    /// Terminal: funds released
    Completed = 100,

    /// Terminal: no funds released to the seller
    Cancelled = -10,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 11] = [
        TransactionStatus::Pending,
        TransactionStatus::Active,
        TransactionStatus::WaitingForDeliveryDetails,
        TransactionStatus::DeliveryDetailsImported,
        TransactionStatus::WaitingForPayment,
        TransactionStatus::PaymentMade,
        TransactionStatus::WaitingForShipment,
        TransactionStatus::ShipmentConfirmed,
        TransactionStatus::WaitingForBuyerConfirmation,
        TransactionStatus::Completed,
        TransactionStatus::Cancelled,
    ];

    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Cancelled
        )
    }

    /// Check if buyer funds are held by the platform
    ///
    /// A plain cancel is not allowed from these states.
    #[inline]
    pub fn is_escrowed(&self) -> bool {
        matches!(
            self,
            TransactionStatus::PaymentMade
                | TransactionStatus::WaitingForShipment
                | TransactionStatus::ShipmentConfirmed
                | TransactionStatus::WaitingForBuyerConfirmation
        )
    }

    /// States from which the condition evaluator may release funds
    #[inline]
    pub fn allows_auto_release(&self) -> bool {
        matches!(
            self,
            TransactionStatus::ShipmentConfirmed | TransactionStatus::WaitingForBuyerConfirmation
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::WaitingForDeliveryDetails => "WAITING_FOR_DELIVERY_DETAILS",
            TransactionStatus::DeliveryDetailsImported => "DELIVERY_DETAILS_IMPORTED",
            TransactionStatus::WaitingForPayment => "WAITING_FOR_PAYMENT",
            TransactionStatus::PaymentMade => "PAYMENT_MADE",
            TransactionStatus::WaitingForShipment => "WAITING_FOR_SHIPMENT",
            TransactionStatus::ShipmentConfirmed => "SHIPMENT_CONFIRMED",
            TransactionStatus::WaitingForBuyerConfirmation => "WAITING_FOR_BUYER_CONFIRMATION",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

/// Commercial role held by a party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommercialRole {
    Buyer,
    Seller,
}

impl CommercialRole {
    /// The role the other party must hold
    #[inline]
    pub fn complement(&self) -> Self {
        match self {
            CommercialRole::Buyer => CommercialRole::Seller,
            CommercialRole::Seller => CommercialRole::Buyer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommercialRole::Buyer => "BUYER",
            CommercialRole::Seller => "SELLER",
        }
    }
}

impl fmt::Display for CommercialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the transaction a user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Party {
    Creator,
    Counterparty,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Creator => write!(f, "CREATOR"),
            Party::Counterparty => write!(f, "COUNTERPARTY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());

        for state in TransactionStatus::ALL {
            if state != TransactionStatus::Completed && state != TransactionStatus::Cancelled {
                assert!(!state.is_terminal(), "{} must not be terminal", state);
            }
        }
    }

    #[test]
    fn test_escrowed_states() {
        assert!(TransactionStatus::PaymentMade.is_escrowed());
        assert!(TransactionStatus::WaitingForShipment.is_escrowed());
        assert!(TransactionStatus::ShipmentConfirmed.is_escrowed());
        assert!(TransactionStatus::WaitingForBuyerConfirmation.is_escrowed());

        assert!(!TransactionStatus::WaitingForPayment.is_escrowed());
        assert!(!TransactionStatus::Completed.is_escrowed());
        assert!(!TransactionStatus::Cancelled.is_escrowed());
    }

    #[test]
    fn test_auto_release_never_skips_shipment() {
        assert!(!TransactionStatus::PaymentMade.allows_auto_release());
        assert!(!TransactionStatus::WaitingForShipment.allows_auto_release());
        assert!(TransactionStatus::ShipmentConfirmed.allows_auto_release());
        assert!(TransactionStatus::WaitingForBuyerConfirmation.allows_auto_release());
    }

    #[test]
    fn test_state_id_lookup() {
        assert_eq!(
            TransactionStatus::from_id(80),
            Some(TransactionStatus::WaitingForBuyerConfirmation)
        );
        assert_eq!(
            TransactionStatus::try_from(-10),
            Ok(TransactionStatus::Cancelled)
        );
        assert!(TransactionStatus::from_id(999).is_none());
    }

    #[test]
    fn test_role_complement() {
        assert_eq!(CommercialRole::Buyer.complement(), CommercialRole::Seller);
        assert_eq!(CommercialRole::Seller.complement(), CommercialRole::Buyer);
    }

    #[test]
    fn test_display() {
        assert_eq!(TransactionStatus::Pending.to_string(), "PENDING");
        assert_eq!(
            TransactionStatus::WaitingForDeliveryDetails.to_string(),
            "WAITING_FOR_DELIVERY_DETAILS"
        );
        assert_eq!(CommercialRole::Seller.to_string(), "SELLER");
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&TransactionStatus::PaymentMade).unwrap();
        assert_eq!(json, "\"PAYMENT_MADE\"");
    }
}
