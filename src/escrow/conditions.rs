//! Auto-Release Condition Evaluator
//!
//! Each transaction carries a [`ConditionSet`]. External facts (clock ticks,
//! delivery confirmation, manual approval, dispute resolution) mark matching
//! conditions as met. Funds may be auto-released only when the set is
//! non-empty and every condition is met.
//!
//! # Invariants
//!
//! 1. **Monotonic**: `is_met` never goes back to `false`.
//! 2. **Type-scoped**: a fact only touches conditions of its own kind.
//! 3. **Passive**: time is supplied by the caller; nothing here schedules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::EscrowError;
use super::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    TimeBased,
    DeliveryConfirmed,
    ManualApproval,
    DisputeResolved,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::TimeBased => "TIME_BASED",
            ConditionKind::DeliveryConfirmed => "DELIVERY_CONFIRMED",
            ConditionKind::ManualApproval => "MANUAL_APPROVAL",
            ConditionKind::DisputeResolved => "DISPUTE_RESOLVED",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured release condition and its type-specific payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionSpec {
    TimeBased { release_at: DateTime<Utc> },
    DeliveryConfirmed,
    /// `approver: None` means the buyer must approve
    ManualApproval {
        #[serde(default)]
        approver: Option<UserId>,
    },
    DisputeResolved,
}

impl ConditionSpec {
    pub fn kind(&self) -> ConditionKind {
        match self {
            ConditionSpec::TimeBased { .. } => ConditionKind::TimeBased,
            ConditionSpec::DeliveryConfirmed => ConditionKind::DeliveryConfirmed,
            ConditionSpec::ManualApproval { .. } => ConditionKind::ManualApproval,
            ConditionSpec::DisputeResolved => ConditionKind::DisputeResolved,
        }
    }
}

/// An incoming fact that may satisfy conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionFact {
    /// Scheduler tick; uses the evaluation time
    Clock,
    DeliveryConfirmed,
    ManualApproval { approver: UserId, is_buyer: bool },
    DisputeResolved,
}

impl ConditionFact {
    pub fn kind(&self) -> ConditionKind {
        match self {
            ConditionFact::Clock => ConditionKind::TimeBased,
            ConditionFact::DeliveryConfirmed => ConditionKind::DeliveryConfirmed,
            ConditionFact::ManualApproval { .. } => ConditionKind::ManualApproval,
            ConditionFact::DisputeResolved => ConditionKind::DisputeResolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCondition {
    pub id: u32,
    pub spec: ConditionSpec,
    pub is_met: bool,
    pub met_at: Option<DateTime<Utc>>,
}

impl PaymentCondition {
    pub fn kind(&self) -> ConditionKind {
        self.spec.kind()
    }

    fn satisfied_by(&self, fact: &ConditionFact, now: DateTime<Utc>) -> bool {
        match (&self.spec, fact) {
            (ConditionSpec::TimeBased { release_at }, ConditionFact::Clock) => now >= *release_at,
            (ConditionSpec::DeliveryConfirmed, ConditionFact::DeliveryConfirmed) => true,
            (
                ConditionSpec::ManualApproval { approver },
                ConditionFact::ManualApproval {
                    approver: by,
                    is_buyer,
                },
            ) => match approver {
                Some(expected) => expected == by,
                None => *is_buyer,
            },
            (ConditionSpec::DisputeResolved, ConditionFact::DisputeResolved) => true,
            _ => false,
        }
    }
}

/// The condition rows of one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSet {
    conditions: Vec<PaymentCondition>,
}

impl ConditionSet {
    pub fn new(specs: Vec<ConditionSpec>) -> Self {
        let conditions = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| PaymentCondition {
                id: i as u32 + 1,
                spec,
                is_met: false,
                met_at: None,
            })
            .collect();
        Self { conditions }
    }

    /// Replace the configured specs, keeping met rows met
    ///
    /// A met condition carries its `met_at` over to an identical new spec;
    /// dropping a met condition is rejected.
    pub fn reconfigure(&self, specs: Vec<ConditionSpec>) -> Result<Self, EscrowError> {
        let mut next = Self::new(specs);
        let mut claimed = vec![false; next.conditions.len()];

        for met in self.conditions.iter().filter(|c| c.is_met) {
            let slot = (0..next.conditions.len())
                .find(|&i| !claimed[i] && next.conditions[i].spec == met.spec)
                .ok_or_else(|| {
                    EscrowError::Validation(format!(
                        "{} condition is already met and cannot be removed",
                        met.kind()
                    ))
                })?;
            claimed[slot] = true;
            next.conditions[slot].is_met = true;
            next.conditions[slot].met_at = met.met_at;
        }
        Ok(next)
    }

    /// Auto-release is enabled iff at least one condition is configured
    #[inline]
    pub fn enabled(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[PaymentCondition] {
        &self.conditions
    }

    /// Latest TIME_BASED release date, if any
    pub fn release_date(&self) -> Option<DateTime<Utc>> {
        self.conditions
            .iter()
            .filter_map(|c| match c.spec {
                ConditionSpec::TimeBased { release_at } => Some(release_at),
                _ => None,
            })
            .max()
    }

    /// Earliest unmet TIME_BASED release date
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.conditions
            .iter()
            .filter(|c| !c.is_met)
            .filter_map(|c| match c.spec {
                ConditionSpec::TimeBased { release_at } => Some(release_at),
                _ => None,
            })
            .min()
    }

    /// Apply a fact; returns ids of conditions that became met
    pub fn record_fact(&mut self, fact: &ConditionFact, now: DateTime<Utc>) -> Vec<u32> {
        let mut newly_met = Vec::new();
        for condition in self.conditions.iter_mut() {
            if condition.is_met || condition.kind() != fact.kind() {
                continue;
            }
            if condition.satisfied_by(fact, now) {
                condition.is_met = true;
                condition.met_at = Some(now);
                newly_met.push(condition.id);
            }
        }
        newly_met
    }

    /// True iff the set is non-empty and every condition is met
    pub fn all_met(&self) -> bool {
        self.enabled() && self.conditions.iter().all(|c| c.is_met)
    }

    pub fn has_kind(&self, kind: ConditionKind) -> bool {
        self.conditions.iter().any(|c| c.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_empty_set_never_releases() {
        let mut set = ConditionSet::new(vec![]);
        assert!(!set.enabled());
        assert!(set.record_fact(&ConditionFact::DeliveryConfirmed, t0()).is_empty());
        assert!(!set.all_met());
    }

    #[test]
    fn test_reconfigure_keeps_met_conditions() {
        let mut set = ConditionSet::new(vec![ConditionSpec::DeliveryConfirmed]);
        set.record_fact(&ConditionFact::DeliveryConfirmed, t0());

        let same = set.reconfigure(vec![ConditionSpec::DeliveryConfirmed]).unwrap();
        assert!(same.conditions()[0].is_met);
        assert_eq!(same.conditions()[0].met_at, Some(t0()));

        let widened = set
            .reconfigure(vec![ConditionSpec::DisputeResolved, ConditionSpec::DeliveryConfirmed])
            .unwrap();
        assert!(!widened.conditions()[0].is_met);
        assert!(widened.conditions()[1].is_met);

        let err = set.reconfigure(vec![ConditionSpec::DisputeResolved]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_facts_only_touch_matching_kind() {
        let mut set = ConditionSet::new(vec![
            ConditionSpec::DeliveryConfirmed,
            ConditionSpec::DisputeResolved,
        ]);

        let met = set.record_fact(&ConditionFact::DeliveryConfirmed, t0());
        assert_eq!(met, vec![1]);
        assert!(set.conditions()[0].is_met);
        assert!(!set.conditions()[1].is_met);
        assert!(!set.all_met());

        set.record_fact(&ConditionFact::DisputeResolved, t0());
        assert!(set.all_met());
    }

    #[test]
    fn test_time_based_waits_for_release_date() {
        let release_at = t0() + Duration::days(3);
        let mut set = ConditionSet::new(vec![ConditionSpec::TimeBased { release_at }]);

        assert!(set.record_fact(&ConditionFact::Clock, t0()).is_empty());
        assert_eq!(set.next_due(), Some(release_at));

        let met = set.record_fact(&ConditionFact::Clock, release_at);
        assert_eq!(met, vec![1]);
        assert_eq!(set.conditions()[0].met_at, Some(release_at));
        assert!(set.all_met());
        assert_eq!(set.next_due(), None);
        assert_eq!(set.release_date(), Some(release_at));
    }

    #[test]
    fn test_met_conditions_stay_met() {
        let release_at = t0() + Duration::days(1);
        let mut set = ConditionSet::new(vec![ConditionSpec::TimeBased { release_at }]);
        set.record_fact(&ConditionFact::Clock, release_at);

        // An earlier clock reading (skewed scheduler) must not un-meet it
        let met = set.record_fact(&ConditionFact::Clock, t0());
        assert!(met.is_empty());
        assert!(set.conditions()[0].is_met);
        assert_eq!(set.conditions()[0].met_at, Some(release_at));

        // Re-applying is a no-op, not a second "became met"
        assert!(set.record_fact(&ConditionFact::Clock, release_at).is_empty());
    }

    #[test]
    fn test_manual_approval_by_buyer_or_named_approver() {
        let mut set = ConditionSet::new(vec![
            ConditionSpec::ManualApproval { approver: None },
            ConditionSpec::ManualApproval { approver: Some(99) },
        ]);

        let seller = ConditionFact::ManualApproval {
            approver: 7,
            is_buyer: false,
        };
        assert!(set.record_fact(&seller, t0()).is_empty());

        let buyer = ConditionFact::ManualApproval {
            approver: 8,
            is_buyer: true,
        };
        assert_eq!(set.record_fact(&buyer, t0()), vec![1]);

        let named = ConditionFact::ManualApproval {
            approver: 99,
            is_buyer: false,
        };
        assert_eq!(set.record_fact(&named, t0()), vec![2]);
        assert!(set.all_met());
    }

    #[test]
    fn test_spec_serde_shape() {
        let spec = ConditionSpec::ManualApproval { approver: Some(5) };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "MANUAL_APPROVAL");
        assert_eq!(json["approver"], 5);

        let parsed: ConditionSpec =
            serde_json::from_str(r#"{"type":"DELIVERY_CONFIRMED"}"#).unwrap();
        assert_eq!(parsed.kind(), ConditionKind::DeliveryConfirmed);
    }
}
