use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::MarketplaceConfig;

use super::domain::{
    Actor, ActorKind, BuyerId, BuyerType, EntityKind, OfferId, OfferPaymentMethod, PaymentId,
    PropertyId, Role,
};
use super::error::EngineError;
use super::offers::{Offer, OfferAction, OfferStatus, OfferSubmission};
use super::payments::{Payment, PaymentLedger, PaymentRequest};
use super::portfolio::{portfolio, PortfolioEntry};
use super::repository::{PropertyAvailabilitySink, PurchaseRepository, RepositoryError};
use super::tier::{derive_level, ledger_permissions, KycLevel, Permission, PermissionSet};
use super::verification::{AccountEvent, BuyerAccount, VerificationEvent, VerificationLedger};

static OFFER_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static PAYMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_offer_id() -> OfferId {
    let id = OFFER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    OfferId(format!("offer-{id:06}"))
}

fn next_payment_id() -> PaymentId {
    let id = PAYMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PaymentId(format!("pay-{id:06}"))
}

/// Derived standing of an account, as shown on dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStanding {
    pub buyer_id: BuyerId,
    pub level: KycLevel,
    pub permissions: PermissionSet,
    pub ledger: VerificationLedger,
    pub revision: usize,
}

impl AccountStanding {
    fn of(account: &BuyerAccount) -> Result<Self, EngineError> {
        let ledger = account.ledger()?;
        Ok(Self {
            buyer_id: account.buyer_id.clone(),
            level: derive_level(&ledger)?,
            permissions: ledger_permissions(&ledger)?,
            ledger,
            revision: account.revision(),
        })
    }
}

/// Outcome of a bulk outbox retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectRetryReport {
    pub delivered: Vec<OfferId>,
    pub failed: Vec<OfferId>,
}

/// Service composing the lifecycle rules, the repository, and the availability sink.
///
/// Every write loads a snapshot, runs the pure rules, and stores the result with a
/// compare-and-swap. Offer side effects go through the offer's outbox and are only
/// removed from it once the sink accepted them.
pub struct PurchaseService<R, S> {
    repository: Arc<R>,
    sink: Arc<S>,
    config: MarketplaceConfig,
}

impl<R, S> PurchaseService<R, S>
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    pub fn new(repository: Arc<R>, sink: Arc<S>, config: MarketplaceConfig) -> Self {
        Self {
            repository,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// Opens an account with every verification flag unset.
    pub fn register_account(
        &self,
        buyer_id: BuyerId,
        roles: impl IntoIterator<Item = Role>,
        now: DateTime<Utc>,
    ) -> Result<AccountStanding, PurchaseServiceError> {
        let account = self
            .repository
            .insert_account(BuyerAccount::open(buyer_id, roles, now))?;
        info!(buyer_id = %account.buyer_id, "account registered");
        Ok(AccountStanding::of(&account)?)
    }

    /// Feeds a completed verification from one of the intake forms into the ledger.
    pub fn record_verification(
        &self,
        event: VerificationEvent,
        now: DateTime<Utc>,
    ) -> Result<AccountStanding, PurchaseServiceError> {
        let VerificationEvent { kind, buyer_id } = event;
        self.record_account_event(&buyer_id, AccountEvent::VerificationCompleted { kind }, now)
    }

    pub fn select_buyer_type(
        &self,
        buyer_id: &BuyerId,
        buyer_type: BuyerType,
        now: DateTime<Utc>,
    ) -> Result<AccountStanding, PurchaseServiceError> {
        self.record_account_event(buyer_id, AccountEvent::BuyerTypeSelected { buyer_type }, now)
    }

    pub fn grant_role(
        &self,
        buyer_id: &BuyerId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<AccountStanding, PurchaseServiceError> {
        self.record_account_event(buyer_id, AccountEvent::RoleGranted { role }, now)
    }

    fn record_account_event(
        &self,
        buyer_id: &BuyerId,
        event: AccountEvent,
        now: DateTime<Utc>,
    ) -> Result<AccountStanding, PurchaseServiceError> {
        let account = self
            .repository
            .fetch_account(buyer_id)?
            .ok_or(RepositoryError::NotFound)?;

        let updated = account.record(event, now).inspect_err(|err| {
            if let EngineError::LedgerIntegrity(violation) = err {
                error!(%buyer_id, %violation, "stored verification log is corrupt");
            }
        })?;

        if updated.revision() != account.revision() {
            self.repository
                .swap_account(account.revision(), updated.clone())
                .map_err(|err| stale_as_conflict(err, EntityKind::Account, &buyer_id.0))?;
            info!(%buyer_id, revision = updated.revision(), "account event recorded");
        }

        Ok(AccountStanding::of(&updated)?)
    }

    /// Dashboard read model: level and capabilities for an account.
    pub fn permissions(&self, buyer_id: &BuyerId) -> Result<AccountStanding, PurchaseServiceError> {
        let account = self
            .repository
            .fetch_account(buyer_id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(AccountStanding::of(&account)?)
    }

    /// Opens a new pending offer. A buyer whose offer was rejected submits a fresh one.
    pub fn submit_offer(
        &self,
        buyer_id: &BuyerId,
        submission: OfferSubmission,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        let standing = self.permissions(buyer_id)?;
        standing.permissions.require(Permission::MakeOffer)?;
        if submission.payment_method == OfferPaymentMethod::Installments {
            standing.permissions.require(Permission::InstallmentApply)?;
        }

        let offer = Offer::submit(
            next_offer_id(),
            buyer_id.clone(),
            submission,
            now,
            self.config.offer_validity(),
        )?;
        let stored = self.repository.insert_offer(offer)?;
        info!(
            offer_id = %stored.id,
            property_id = %stored.property_id,
            %buyer_id,
            "offer submitted"
        );
        Ok(stored)
    }

    pub fn approve_offer(
        &self,
        offer_id: &OfferId,
        actor: &Actor,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        self.apply_offer_action(offer_id, OfferAction::Approve { notes }, actor, now)
    }

    pub fn reject_offer(
        &self,
        offer_id: &OfferId,
        actor: &Actor,
        reason: String,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        self.apply_offer_action(offer_id, OfferAction::Reject { reason, notes }, actor, now)
    }

    pub fn withdraw_offer(
        &self,
        offer_id: &OfferId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        self.apply_offer_action(offer_id, OfferAction::Withdraw, actor, now)
    }

    pub fn delete_offer(
        &self,
        offer_id: &OfferId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        self.apply_offer_action(offer_id, OfferAction::Delete, actor, now)
    }

    pub fn expire_offer(
        &self,
        offer_id: &OfferId,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        self.apply_offer_action(offer_id, OfferAction::Expire, &Actor::System, now)
    }

    /// Runs one offer transition: load, lazy expiry, rules, compare-and-swap, effects.
    pub fn apply_offer_action(
        &self,
        offer_id: &OfferId,
        action: OfferAction,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        let mut offer = self
            .repository
            .fetch_offer(offer_id)?
            .ok_or(RepositoryError::NotFound)?;

        if actor.kind() != ActorKind::System {
            offer = self.expire_if_lapsed(offer, now)?;
        }

        if action == OfferAction::Delete {
            let payments = self.repository.payments_for_offer(offer_id)?;
            if PaymentLedger::from_payments(offer_id.clone(), payments).binds_offer() {
                return Err(EngineError::IllegalTransition {
                    entity: EntityKind::Offer,
                    from: offer.status().label(),
                    to: OfferStatus::Deleted.label(),
                }
                .into());
            }
        }

        let committed = self.commit_offer_action(&offer, action, actor, now)?;
        self.dispatch_effects(committed)
    }

    fn commit_offer_action(
        &self,
        offer: &Offer,
        action: OfferAction,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        let retiring = action == OfferAction::Delete;
        let transition = offer.transition(action, actor, now)?;
        let written = if retiring {
            self.repository
                .retire_offer(offer.status(), transition.offer.clone())
        } else {
            self.repository
                .swap_offer(offer.status(), transition.offer.clone())
        };
        written.map_err(|err| stale_as_conflict(err, EntityKind::Offer, &offer.id.0))?;

        info!(
            offer_id = %offer.id,
            from = %offer.status(),
            to = %transition.offer.status(),
            actor = %actor.kind(),
            effects = transition.effects.len(),
            "offer transition committed"
        );
        Ok(transition.offer)
    }

    fn expire_if_lapsed(&self, offer: Offer, now: DateTime<Utc>) -> Result<Offer, PurchaseServiceError> {
        if !offer.is_lapsed(now) {
            return Ok(offer);
        }

        match self.commit_offer_action(&offer, OfferAction::Expire, &Actor::System, now) {
            Ok(expired) => Ok(expired),
            Err(PurchaseServiceError::Engine(EngineError::ConcurrentModification { .. })) => {
                let current = self
                    .repository
                    .fetch_offer(&offer.id)?
                    .ok_or(RepositoryError::NotFound)?;
                Ok(current)
            }
            Err(other) => Err(other),
        }
    }

    /// Delivers the offer's outstanding availability notifications.
    fn dispatch_effects(&self, offer: Offer) -> Result<Offer, PurchaseServiceError> {
        if offer.pending_effects().is_empty() {
            return Ok(offer);
        }

        let mut delivered = Vec::new();
        let mut failure = None;
        for effect in offer.pending_effects() {
            match self.notify_with_attempts(&effect.change.property_id, effect.change.available) {
                Ok(()) => delivered.push(effect.sequence),
                Err(reason) => {
                    failure = Some(reason);
                    break;
                }
            }
        }

        let mut current = offer.clone();
        if !delivered.is_empty() {
            let acknowledged = offer.acknowledge_effects(&delivered);
            match self
                .repository
                .swap_offer(offer.status(), acknowledged.clone())
            {
                Ok(()) => current = acknowledged,
                Err(RepositoryError::Stale) => {
                    warn!(
                        offer_id = %offer.id,
                        "offer changed before effects were acknowledged; notifications will be resent"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        match failure {
            None => Ok(current),
            Some(reason) => {
                error!(
                    offer_id = %offer.id,
                    property_id = %offer.property_id,
                    %reason,
                    "availability notification failed; left in outbox"
                );
                Err(EngineError::SideEffectFailed {
                    offer_id: offer.id.clone(),
                    reason,
                }
                .into())
            }
        }
    }

    fn notify_with_attempts(
        &self,
        property_id: &PropertyId,
        available: bool,
    ) -> Result<(), String> {
        let attempts = self.config.dispatch_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.sink.notify_availability_changed(property_id, available) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(%property_id, attempt, error = %err, "availability notification attempt failed");
                    last_error = err.to_string();
                }
            }
        }
        Err(last_error)
    }

    /// Compensating retry for an offer whose notification failed after commit.
    pub fn retry_offer_effects(&self, offer_id: &OfferId) -> Result<Offer, PurchaseServiceError> {
        let offer = self
            .repository
            .fetch_offer(offer_id)?
            .ok_or(RepositoryError::NotFound)?;
        self.dispatch_effects(offer)
    }

    /// Retries every offer with undelivered notifications.
    pub fn retry_all_effects(&self, limit: usize) -> Result<EffectRetryReport, PurchaseServiceError> {
        let mut report = EffectRetryReport::default();
        for offer in self.repository.offers_with_pending_effects(limit)? {
            let offer_id = offer.id.clone();
            match self.dispatch_effects(offer) {
                Ok(_) => report.delivered.push(offer_id),
                Err(PurchaseServiceError::Engine(EngineError::SideEffectFailed { .. })) => {
                    report.failed.push(offer_id)
                }
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    /// Expires pending offers past their deadline. Offers decided concurrently are skipped.
    pub fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OfferId>, PurchaseServiceError> {
        let mut expired = Vec::new();
        for offer in self.repository.pending_offers(limit)? {
            if !offer.is_lapsed(now) {
                continue;
            }
            match self.commit_offer_action(&offer, OfferAction::Expire, &Actor::System, now) {
                Ok(_) => expired.push(offer.id),
                Err(PurchaseServiceError::Engine(EngineError::ConcurrentModification { .. })) => {
                    warn!(offer_id = %offer.id, "offer changed during expiry sweep; skipped");
                }
                Err(other) => return Err(other),
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired lapsed offers");
        }
        Ok(expired)
    }

    /// Dashboard read model: current offer, expiring it first when its deadline passed.
    pub fn offer_status(
        &self,
        offer_id: &OfferId,
        now: DateTime<Utc>,
    ) -> Result<Offer, PurchaseServiceError> {
        let offer = self
            .repository
            .fetch_offer(offer_id)?
            .ok_or(RepositoryError::NotFound)?;
        self.expire_if_lapsed(offer, now)
    }

    /// Offers still shown on the buyer's dashboard.
    pub fn active_offers(
        &self,
        buyer_id: &BuyerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>, PurchaseServiceError> {
        let mut listed = Vec::new();
        for offer in self.repository.offers_for_buyer(buyer_id)? {
            let offer = self.expire_if_lapsed(offer, now)?;
            if offer.status().is_listed() {
                listed.push(offer);
            }
        }
        Ok(listed)
    }

    /// Records a payment proof against an approved offer.
    pub fn submit_payment(
        &self,
        offer_id: &OfferId,
        actor: &Actor,
        request: PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<Payment, PurchaseServiceError> {
        let Actor::Buyer(buyer_id) = actor else {
            return Err(EngineError::Unauthorized {
                actor: actor.kind(),
                action: "submit payments",
            }
            .into());
        };

        let offer = self
            .repository
            .fetch_offer(offer_id)?
            .ok_or(RepositoryError::NotFound)?;
        let standing = self.permissions(buyer_id)?;
        let mut ledger = PaymentLedger::from_payments(
            offer_id.clone(),
            self.repository.payments_for_offer(offer_id)?,
        );

        let payment = ledger.submit_payment(
            &offer,
            &standing.permissions,
            actor,
            next_payment_id(),
            request,
            &self.config.currency,
            now,
        )?;
        let binding_total = ledger.total_binding()?;
        let stored = self
            .repository
            .insert_payment(OfferStatus::Approved, payment)
            .map_err(|err| stale_as_conflict(err, EntityKind::Offer, &offer_id.0))?;
        info!(
            payment_id = %stored.id,
            %offer_id,
            amount = %stored.amount(),
            %binding_total,
            "payment submitted"
        );
        Ok(stored)
    }

    /// Reviewer confirms a payment. The offer must still be approved when the write lands.
    pub fn verify_payment(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Payment, PurchaseServiceError> {
        let payment = self.load_payment(payment_id)?;
        let offer = self
            .repository
            .fetch_offer(&payment.offer_id)?
            .ok_or(RepositoryError::NotFound)?;
        if offer.status() != OfferStatus::Approved {
            return Err(EngineError::OfferNotApproved {
                status: offer.status(),
                offer_id: offer.id,
            }
            .into());
        }

        let updated = payment.verify(actor, now)?;
        self.commit_payment(&payment, updated, Some(OfferStatus::Approved))
    }

    pub fn reject_payment(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, PurchaseServiceError> {
        let payment = self.load_payment(payment_id)?;
        let updated = payment.reject(actor, reason, now)?;
        self.commit_payment(&payment, updated, None)
    }

    pub fn cancel_payment(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Payment, PurchaseServiceError> {
        let payment = self.load_payment(payment_id)?;
        let updated = payment.cancel(actor, now)?;
        self.commit_payment(&payment, updated, None)
    }

    fn load_payment(&self, payment_id: &PaymentId) -> Result<Payment, PurchaseServiceError> {
        Ok(self
            .repository
            .fetch_payment(payment_id)?
            .ok_or(RepositoryError::NotFound)?)
    }

    fn commit_payment(
        &self,
        current: &Payment,
        updated: Payment,
        offer_status: Option<OfferStatus>,
    ) -> Result<Payment, PurchaseServiceError> {
        self.repository
            .swap_payment(current.status(), offer_status, updated.clone())
            .map_err(|err| stale_as_conflict(err, EntityKind::Payment, &current.id.0))?;

        info!(
            payment_id = %current.id,
            from = %current.status(),
            to = %updated.status(),
            "payment transition committed"
        );
        Ok(updated)
    }

    pub fn payments_for_offer(&self, offer_id: &OfferId) -> Result<Vec<Payment>, PurchaseServiceError> {
        Ok(self.repository.payments_for_offer(offer_id)?)
    }

    /// Dashboard read model: approved offers with at least one verified payment.
    pub fn portfolio(&self, buyer_id: &BuyerId) -> Result<Vec<PortfolioEntry>, PurchaseServiceError> {
        let offers: Vec<Offer> = self
            .repository
            .offers_for_buyer(buyer_id)?
            .into_iter()
            .filter(|offer| offer.status() == OfferStatus::Approved)
            .collect();

        let mut payments = Vec::new();
        for offer in &offers {
            payments.extend(self.repository.payments_for_offer(&offer.id)?);
        }
        Ok(portfolio(&offers, &payments)?)
    }
}

fn stale_as_conflict(err: RepositoryError, entity: EntityKind, id: &str) -> PurchaseServiceError {
    match err {
        RepositoryError::Stale => {
            warn!(%entity, id, "rejected stale write");
            EngineError::ConcurrentModification {
                entity,
                id: id.to_string(),
            }
            .into()
        }
        other => other.into(),
    }
}

/// Error raised by the purchase service.
#[derive(Debug, thiserror::Error)]
pub enum PurchaseServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
