use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, ActorKind, BuyerId, EntityKind, Money, OfferId, OfferPaymentMethod, PropertyId,
};
use super::error::EngineError;

/// Lifecycle of a purchase offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
    Expired,
    /// Buyer removed a decided offer; kept as an audit tombstone. An offer holding pending
    /// or completed payments is never deleted, so a tombstone carries no live payments.
    Deleted,
}

impl OfferStatus {
    pub const fn ordered() -> [Self; 6] {
        [
            Self::Pending,
            Self::Approved,
            Self::Rejected,
            Self::Withdrawn,
            Self::Expired,
            Self::Deleted,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        }
    }

    /// Still listed on the buyer's dashboard.
    pub const fn is_listed(self) -> bool {
        !matches!(self, Self::Withdrawn | Self::Deleted)
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Buyer supplied terms for a new offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSubmission {
    pub property_id: PropertyId,
    pub offer_price: Money,
    pub deposit_amount: Money,
    pub payment_method: OfferPaymentMethod,
    pub estimated_timeline: String,
}

/// Requested change to an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OfferAction {
    Approve {
        #[serde(default)]
        notes: Option<String>,
    },
    Reject {
        reason: String,
        #[serde(default)]
        notes: Option<String>,
    },
    Withdraw,
    Expire,
    Delete,
}

impl OfferAction {
    pub const fn target(&self) -> OfferStatus {
        match self {
            Self::Approve { .. } => OfferStatus::Approved,
            Self::Reject { .. } => OfferStatus::Rejected,
            Self::Withdraw => OfferStatus::Withdrawn,
            Self::Expire => OfferStatus::Expired,
            Self::Delete => OfferStatus::Deleted,
        }
    }
}

/// Notification owed to the property collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyAvailabilityChanged {
    pub property_id: PropertyId,
    pub available: bool,
}

/// Outbox entry; `sequence` is the index of the history record that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEffect {
    pub sequence: usize,
    pub change: PropertyAvailabilityChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTransitionRecord {
    pub from: OfferStatus,
    pub to: OfferStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub property_id: PropertyId,
    pub buyer_id: BuyerId,
    pub offer_price: Money,
    pub deposit_amount: Money,
    pub payment_method: OfferPaymentMethod,
    pub estimated_timeline: String,
    pub submitted_at: DateTime<Utc>,
    pub admin_reviewed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub admin_notes: Option<String>,
    status: OfferStatus,
    history: Vec<OfferTransitionRecord>,
    pending_effects: Vec<PendingEffect>,
}

/// Result of a legal transition: the new snapshot and the effects it owes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferTransition {
    pub offer: Offer,
    pub effects: Vec<PendingEffect>,
}

impl Offer {
    /// Opens a pending offer after validating the proposed amounts.
    pub fn submit(
        id: OfferId,
        buyer_id: BuyerId,
        submission: OfferSubmission,
        now: DateTime<Utc>,
        validity: Option<Duration>,
    ) -> Result<Self, EngineError> {
        if submission.offer_price <= Money::ZERO {
            return Err(EngineError::InvalidAmount {
                field: "offer_price",
                amount: submission.offer_price,
            });
        }
        if submission.deposit_amount < Money::ZERO
            || submission.deposit_amount > submission.offer_price
        {
            return Err(EngineError::InvalidAmount {
                field: "deposit_amount",
                amount: submission.deposit_amount,
            });
        }

        Ok(Self {
            id,
            property_id: submission.property_id,
            buyer_id,
            offer_price: submission.offer_price,
            deposit_amount: submission.deposit_amount,
            payment_method: submission.payment_method,
            estimated_timeline: submission.estimated_timeline,
            submitted_at: now,
            admin_reviewed_at: None,
            expires_at: validity.map(|window| now + window),
            rejection_reason: None,
            admin_notes: None,
            status: OfferStatus::Pending,
            history: Vec::new(),
            pending_effects: Vec::new(),
        })
    }

    pub fn status(&self) -> OfferStatus {
        self.status
    }

    pub fn history(&self) -> &[OfferTransitionRecord] {
        &self.history
    }

    /// Effects recorded by committed transitions that the collaborator has not yet acknowledged.
    pub fn pending_effects(&self) -> &[PendingEffect] {
        &self.pending_effects
    }

    /// Pending offer whose expiry time has passed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Pending && self.expires_at.is_some_and(|at| now > at)
    }

    /// Applies `action` on behalf of `actor`.
    ///
    /// Legality is checked before authority so a decided offer always reports
    /// `IllegalTransition`, whoever asks.
    pub fn transition(
        &self,
        action: OfferAction,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<OfferTransition, EngineError> {
        let from = self.status;
        let to = action.target();
        let mut next = self.clone();

        let available = match (from, action) {
            (OfferStatus::Pending, OfferAction::Approve { notes }) => {
                require_actor(actor, ActorKind::Reviewer, "approve offers")?;
                next.admin_reviewed_at = Some(now);
                next.admin_notes = notes;
                Some(false)
            }
            (OfferStatus::Pending, OfferAction::Reject { reason, notes }) => {
                require_actor(actor, ActorKind::Reviewer, "reject offers")?;
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(EngineError::MissingRejectionReason);
                }
                next.admin_reviewed_at = Some(now);
                next.rejection_reason = Some(reason.to_string());
                next.admin_notes = notes;
                Some(true)
            }
            (OfferStatus::Pending, OfferAction::Withdraw) => {
                self.require_owner(actor, "withdraw this offer")?;
                Some(true)
            }
            (OfferStatus::Pending, OfferAction::Expire) => {
                require_actor(actor, ActorKind::System, "expire offers")?;
                if !self.is_lapsed(now) {
                    return Err(EngineError::NotYetExpired(self.id.clone()));
                }
                None
            }
            (
                OfferStatus::Approved | OfferStatus::Rejected | OfferStatus::Expired,
                OfferAction::Delete,
            ) => {
                self.require_owner(actor, "delete this offer")?;
                Some(true)
            }
            _ => {
                return Err(EngineError::IllegalTransition {
                    entity: EntityKind::Offer,
                    from: from.label(),
                    to: to.label(),
                })
            }
        };

        next.status = to;
        next.history.push(OfferTransitionRecord {
            from,
            to,
            actor: actor.clone(),
            at: now,
        });

        let effects: Vec<PendingEffect> = available
            .map(|available| PendingEffect {
                sequence: next.history.len() - 1,
                change: PropertyAvailabilityChanged {
                    property_id: self.property_id.clone(),
                    available,
                },
            })
            .into_iter()
            .collect();
        next.pending_effects.extend(effects.iter().cloned());

        Ok(OfferTransition {
            offer: next,
            effects,
        })
    }

    /// Drops outbox entries the collaborator has confirmed.
    pub fn acknowledge_effects(&self, sequences: &[usize]) -> Self {
        let mut next = self.clone();
        next.pending_effects
            .retain(|effect| !sequences.contains(&effect.sequence));
        next
    }

    fn require_owner(&self, actor: &Actor, action: &'static str) -> Result<(), EngineError> {
        if actor.is_buyer(&self.buyer_id) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                actor: actor.kind(),
                action,
            })
        }
    }
}

fn require_actor(
    actor: &Actor,
    expected: ActorKind,
    action: &'static str,
) -> Result<(), EngineError> {
    if actor.kind() == expected {
        Ok(())
    } else {
        Err(EngineError::Unauthorized {
            actor: actor.kind(),
            action,
        })
    }
}
