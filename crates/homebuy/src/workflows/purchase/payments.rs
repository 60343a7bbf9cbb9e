use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, BuyerId, EntityKind, Money, OfferId, PaymentChannel, PaymentId, ReviewerId,
};
use super::error::EngineError;
use super::offers::{Offer, OfferStatus};
use super::tier::{Permission, PermissionSet};

/// Pending plus completed payments may not exceed this multiple of the offer price.
pub const MAX_PAYMENT_MULTIPLE: Money = Money::TWO;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub const fn ordered() -> [Self; 4] {
        [Self::Pending, Self::Completed, Self::Failed, Self::Cancelled]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Pending and completed payments hold the offer: it cannot be deleted under them.
    pub const fn binds_offer(self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }

    /// Statuses only move forward out of `Pending`; every other pair is illegal.
    pub fn advance(self, to: Self) -> Result<Self, EngineError> {
        match (self, to) {
            (Self::Pending, Self::Completed | Self::Failed | Self::Cancelled) => Ok(to),
            _ => Err(EngineError::IllegalTransition {
                entity: EntityKind::Payment,
                from: self.label(),
                to: to.label(),
            }),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Buyer supplied payment proof details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub method: PaymentChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransitionRecord {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// One payment attempt against an approved offer. The amount is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub offer_id: OfferId,
    pub buyer_id: BuyerId,
    pub currency: String,
    pub payment_method: PaymentChannel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    pub reviewed_by: Option<ReviewerId>,
    amount: Money,
    status: PaymentStatus,
    history: Vec<PaymentTransitionRecord>,
}

impl Payment {
    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn history(&self) -> &[PaymentTransitionRecord] {
        &self.history
    }

    /// Reviewer confirms the funds arrived.
    pub fn verify(&self, actor: &Actor, now: DateTime<Utc>) -> Result<Self, EngineError> {
        let reviewer = reviewer_of(actor, "verify payments")?;
        let mut next = self.advance(PaymentStatus::Completed, actor, now)?;
        next.reviewed_by = Some(reviewer);
        Ok(next)
    }

    /// Reviewer refuses the proof; the buyer has to submit a new payment.
    pub fn reject(
        &self,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let reviewer = reviewer_of(actor, "reject payments")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::MissingRejectionReason);
        }
        let mut next = self.advance(PaymentStatus::Failed, actor, now)?;
        next.reviewed_by = Some(reviewer);
        next.failure_reason = Some(reason.to_string());
        Ok(next)
    }

    /// Buyer retracts a payment that has not been reviewed yet.
    pub fn cancel(&self, actor: &Actor, now: DateTime<Utc>) -> Result<Self, EngineError> {
        if !actor.is_buyer(&self.buyer_id) {
            return Err(EngineError::Unauthorized {
                actor: actor.kind(),
                action: "cancel this payment",
            });
        }
        self.advance(PaymentStatus::Cancelled, actor, now)
    }

    fn advance(
        &self,
        to: PaymentStatus,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let from = self.status;
        let mut next = self.clone();
        next.status = from.advance(to)?;
        next.updated_at = now;
        next.history.push(PaymentTransitionRecord {
            from,
            to,
            actor: actor.clone(),
            at: now,
        });
        Ok(next)
    }
}

fn reviewer_of(actor: &Actor, action: &'static str) -> Result<ReviewerId, EngineError> {
    match actor {
        Actor::Reviewer(id) => Ok(id.clone()),
        other => Err(EngineError::Unauthorized {
            actor: other.kind(),
            action,
        }),
    }
}

/// Append-only collection of the payments recorded against one offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLedger {
    pub offer_id: OfferId,
    payments: Vec<Payment>,
}

impl PaymentLedger {
    pub fn new(offer_id: OfferId) -> Self {
        Self {
            offer_id,
            payments: Vec::new(),
        }
    }

    /// Builds the ledger from stored payments, keeping only those for `offer_id`.
    pub fn from_payments(offer_id: OfferId, payments: impl IntoIterator<Item = Payment>) -> Self {
        let payments = payments
            .into_iter()
            .filter(|payment| payment.offer_id == offer_id)
            .collect();
        Self { offer_id, payments }
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn completed(&self) -> impl Iterator<Item = &Payment> + '_ {
        self.payments
            .iter()
            .filter(|payment| payment.status == PaymentStatus::Completed)
    }

    pub fn total_completed(&self) -> Result<Money, EngineError> {
        checked_total(self.completed())
    }

    /// Sum of the payments that still bind the offer, pending ones included.
    pub fn total_binding(&self) -> Result<Money, EngineError> {
        checked_total(
            self.payments
                .iter()
                .filter(|payment| payment.status.binds_offer()),
        )
    }

    pub fn has_completed(&self) -> bool {
        self.completed().next().is_some()
    }

    pub fn binds_offer(&self) -> bool {
        self.payments
            .iter()
            .any(|payment| payment.status.binds_offer())
    }

    /// Appends a new pending payment and returns it.
    ///
    /// Only the offer's buyer may pay, only into an approved offer, and only with the
    /// `submit_payment` permission. Pending plus completed amounts stay within
    /// [`MAX_PAYMENT_MULTIPLE`] of the offer price.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_payment(
        &mut self,
        offer: &Offer,
        permissions: &PermissionSet,
        actor: &Actor,
        id: PaymentId,
        request: PaymentRequest,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, EngineError> {
        if !actor.is_buyer(&offer.buyer_id) {
            return Err(EngineError::Unauthorized {
                actor: actor.kind(),
                action: "pay into this offer",
            });
        }
        permissions.require(Permission::SubmitPayment)?;
        if offer.status() != OfferStatus::Approved {
            return Err(EngineError::OfferNotApproved {
                offer_id: offer.id.clone(),
                status: offer.status(),
            });
        }
        if request.amount <= Money::ZERO {
            return Err(EngineError::InvalidAmount {
                field: "amount",
                amount: request.amount,
            });
        }
        let ceiling = offer
            .offer_price
            .checked_mul(MAX_PAYMENT_MULTIPLE)
            .unwrap_or(Money::MAX);
        let within_ceiling = self
            .total_binding()?
            .checked_add(request.amount)
            .is_some_and(|total| total <= ceiling);
        if !within_ceiling {
            return Err(EngineError::InvalidAmount {
                field: "amount",
                amount: request.amount,
            });
        }

        let payment = Payment {
            id,
            offer_id: offer.id.clone(),
            buyer_id: offer.buyer_id.clone(),
            currency: currency.to_string(),
            payment_method: request.method,
            created_at: now,
            updated_at: now,
            failure_reason: None,
            reviewed_by: None,
            amount: request.amount,
            status: PaymentStatus::Pending,
            history: Vec::new(),
        };

        self.payments.push(payment.clone());
        Ok(payment)
    }
}

fn checked_total<'a>(payments: impl Iterator<Item = &'a Payment>) -> Result<Money, EngineError> {
    payments.fold(Ok(Money::ZERO), |total, payment| {
        total?
            .checked_add(payment.amount)
            .ok_or(EngineError::InvalidAmount {
                field: "total_paid",
                amount: payment.amount,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::purchase::domain::{OfferPaymentMethod, PropertyId};
    use crate::workflows::purchase::offers::{OfferAction, OfferSubmission};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, 8, 30, 0).single().expect("valid time")
    }

    fn buyer() -> Actor {
        Actor::Buyer(BuyerId("buyer-1".to_string()))
    }

    fn reviewer() -> Actor {
        Actor::Reviewer(ReviewerId("rev-7".to_string()))
    }

    fn paying_permissions() -> PermissionSet {
        [Permission::MakeOffer, Permission::SubmitPayment]
            .into_iter()
            .collect()
    }

    fn offer(approved: bool) -> Offer {
        let offer = Offer::submit(
            OfferId("offer-1".to_string()),
            BuyerId("buyer-1".to_string()),
            OfferSubmission {
                property_id: PropertyId("prop-1".to_string()),
                offer_price: dec!(100000),
                deposit_amount: dec!(10000),
                payment_method: OfferPaymentMethod::Installments,
                estimated_timeline: "6 months".to_string(),
            },
            now(),
            None,
        )
        .expect("valid offer");
        if approved {
            offer
                .transition(OfferAction::Approve { notes: None }, &reviewer(), now())
                .expect("approves")
                .offer
        } else {
            offer
        }
    }

    fn submit_into(
        ledger: &mut PaymentLedger,
        offer: &Offer,
        seq: u32,
        amount: Money,
    ) -> Result<Payment, EngineError> {
        ledger.submit_payment(
            offer,
            &paying_permissions(),
            &buyer(),
            PaymentId(format!("pay-{seq}")),
            PaymentRequest {
                amount,
                method: PaymentChannel::BankTransfer,
            },
            "USD",
            now(),
        )
    }

    fn submit(offer: &Offer, amount: Money) -> Result<Payment, EngineError> {
        submit_into(&mut PaymentLedger::new(offer.id.clone()), offer, 1, amount)
    }

    #[test]
    fn only_approved_offers_accept_payments() {
        assert_eq!(
            submit(&offer(false), dec!(5000)),
            Err(EngineError::OfferNotApproved {
                offer_id: OfferId("offer-1".to_string()),
                status: OfferStatus::Pending,
            })
        );

        let offer = offer(true);
        let mut ledger = PaymentLedger::new(offer.id.clone());
        let payment = submit_into(&mut ledger, &offer, 1, dec!(5000)).expect("accepted");
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(ledger.payments().len(), 1);
        assert_eq!(ledger.total_completed(), Ok(dec!(0)));
        assert_eq!(ledger.total_binding(), Ok(dec!(5000)));
        assert!(ledger.binds_offer());
    }

    #[test]
    fn status_only_moves_forward() {
        for from in PaymentStatus::ordered() {
            for to in PaymentStatus::ordered() {
                let legal = from == PaymentStatus::Pending && to != PaymentStatus::Pending;
                assert_eq!(from.advance(to).is_ok(), legal, "{from} -> {to}");
            }
        }
        assert_eq!(
            PaymentStatus::Completed.advance(PaymentStatus::Pending),
            Err(EngineError::IllegalTransition {
                entity: EntityKind::Payment,
                from: "completed",
                to: "pending",
            })
        );
    }

    #[test]
    fn verified_payments_are_terminal() {
        let payment = submit(&offer(true), dec!(5000)).expect("accepted");
        let verified = payment.verify(&reviewer(), now()).expect("verifies");
        assert_eq!(verified.status(), PaymentStatus::Completed);
        assert_eq!(verified.reviewed_by, Some(ReviewerId("rev-7".to_string())));
        assert_eq!(verified.amount(), dec!(5000));

        assert!(matches!(
            verified.reject(&reviewer(), "duplicate", now()),
            Err(EngineError::IllegalTransition { .. })
        ));
        assert!(matches!(
            verified.cancel(&buyer(), now()),
            Err(EngineError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn rejection_needs_reviewer_and_reason() {
        let payment = submit(&offer(true), dec!(5000)).expect("accepted");
        assert!(matches!(
            payment.reject(&buyer(), "blurry receipt", now()),
            Err(EngineError::Unauthorized { .. })
        ));
        assert_eq!(
            payment.reject(&reviewer(), " ", now()),
            Err(EngineError::MissingRejectionReason)
        );

        let failed = payment
            .reject(&reviewer(), "blurry receipt", now())
            .expect("rejects");
        assert_eq!(failed.status(), PaymentStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("blurry receipt"));
        assert_eq!(failed.history().len(), 1);
    }

    #[test]
    fn missing_permission_blocks_submission() {
        let offer = offer(true);
        let result = PaymentLedger::new(offer.id.clone()).submit_payment(
            &offer,
            &PermissionSet::default(),
            &buyer(),
            PaymentId("pay-2".to_string()),
            PaymentRequest {
                amount: dec!(10),
                method: PaymentChannel::Card,
            },
            "USD",
            now(),
        );
        assert_eq!(
            result,
            Err(EngineError::PermissionDenied(Permission::SubmitPayment))
        );
    }

    #[test]
    fn non_positive_amounts_are_refused() {
        assert!(matches!(
            submit(&offer(true), dec!(0)),
            Err(EngineError::InvalidAmount { field: "amount", .. })
        ));
    }

    #[test]
    fn ledger_only_holds_its_offer() {
        let payment = submit(&offer(true), dec!(700)).expect("accepted");
        let mut foreign = payment.clone();
        foreign.offer_id = OfferId("offer-2".to_string());

        let ledger = PaymentLedger::from_payments(OfferId("offer-1".to_string()), [payment, foreign]);
        assert_eq!(ledger.payments().len(), 1);
    }

    #[test]
    fn payments_stop_at_twice_the_offer_price() {
        let offer = offer(true);
        let mut ledger = PaymentLedger::new(offer.id.clone());
        submit_into(&mut ledger, &offer, 1, dec!(150000)).expect("first payment");
        submit_into(&mut ledger, &offer, 2, dec!(50000)).expect("reaches the ceiling");

        assert_eq!(
            submit_into(&mut ledger, &offer, 3, dec!(0.01)),
            Err(EngineError::InvalidAmount {
                field: "amount",
                amount: dec!(0.01),
            })
        );
        assert!(matches!(
            submit(&offer, Money::MAX),
            Err(EngineError::InvalidAmount { field: "amount", .. })
        ));
    }

    #[test]
    fn cancelled_payments_free_their_share_of_the_ceiling() {
        let offer = offer(true);
        let mut ledger = PaymentLedger::new(offer.id.clone());
        let first = submit_into(&mut ledger, &offer, 1, dec!(200000)).expect("first payment");
        let cancelled = first.cancel(&buyer(), now()).expect("cancels");

        let mut ledger = PaymentLedger::from_payments(offer.id.clone(), [cancelled]);
        assert!(!ledger.binds_offer());
        submit_into(&mut ledger, &offer, 2, dec!(200000)).expect("room again");
    }
}
