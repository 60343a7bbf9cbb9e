use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::config::MarketplaceConfig;
use crate::workflows::purchase::domain::{
    Actor, BuyerId, BuyerType, OfferId, OfferPaymentMethod, PaymentId, PropertyId, ReviewerId,
    Role,
};
use crate::workflows::purchase::offers::{Offer, OfferStatus, OfferSubmission};
use crate::workflows::purchase::payments::{Payment, PaymentStatus};
use crate::workflows::purchase::repository::{
    PropertyAvailabilitySink, PurchaseRepository, RepositoryError, SinkError,
};
use crate::workflows::purchase::service::PurchaseService;
use crate::workflows::purchase::verification::{BuyerAccount, VerificationEvent, VerificationKind};

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn buyer() -> BuyerId {
    BuyerId("buyer-amina".to_string())
}

pub(super) fn buyer_actor() -> Actor {
    Actor::Buyer(buyer())
}

pub(super) fn reviewer() -> Actor {
    Actor::Reviewer(ReviewerId("reviewer-omar".to_string()))
}

pub(super) fn property() -> PropertyId {
    PropertyId("prop-zamalek-12".to_string())
}

pub(super) fn submission() -> OfferSubmission {
    OfferSubmission {
        property_id: property(),
        offer_price: dec!(200000),
        deposit_amount: dec!(20000),
        payment_method: OfferPaymentMethod::Cash,
        estimated_timeline: "90 days".to_string(),
    }
}

pub(super) fn config() -> MarketplaceConfig {
    MarketplaceConfig {
        offer_validity_days: 14,
        currency: "USD".to_string(),
        dispatch_attempts: 2,
    }
}

pub(super) type MemoryService = PurchaseService<MemoryRepository, MemoryAvailabilitySink>;

pub(super) fn build_service() -> (
    MemoryService,
    Arc<MemoryRepository>,
    Arc<MemoryAvailabilitySink>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let sink = Arc::new(MemoryAvailabilitySink::default());
    let service = PurchaseService::new(repository.clone(), sink.clone(), config());
    (service, repository, sink)
}

/// Registers the default buyer and verifies email, phone, and identity.
pub(super) fn verified_buyer<R, S>(service: &PurchaseService<R, S>)
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    service
        .register_account(buyer(), [Role::Buyer], now())
        .expect("account registers");
    for kind in [
        VerificationKind::Email,
        VerificationKind::Phone,
        VerificationKind::Identity,
    ] {
        service
            .record_verification(
                VerificationEvent {
                    kind,
                    buyer_id: buyer(),
                },
                now(),
            )
            .expect("verification recorded");
    }
}

pub(super) fn installment_buyer<R, S>(service: &PurchaseService<R, S>)
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    verified_buyer(service);
    service
        .record_verification(
            VerificationEvent {
                kind: VerificationKind::Financial,
                buyer_id: buyer(),
            },
            now(),
        )
        .expect("financial verification recorded");
    service
        .select_buyer_type(&buyer(), BuyerType::Installment, now())
        .expect("buyer type selected");
}

/// Verified buyer with an approved offer.
pub(super) fn approved_offer<R, S>(service: &PurchaseService<R, S>) -> Offer
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    verified_buyer(service);
    let offer = service
        .submit_offer(&buyer(), submission(), now())
        .expect("offer submitted");
    service
        .approve_offer(&offer.id, &reviewer(), None, now())
        .expect("offer approved")
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    accounts: Mutex<BTreeMap<BuyerId, BuyerAccount>>,
    offers: Mutex<BTreeMap<OfferId, Offer>>,
    payments: Mutex<BTreeMap<PaymentId, Payment>>,
}

impl PurchaseRepository for MemoryRepository {
    fn insert_account(&self, account: BuyerAccount) -> Result<BuyerAccount, RepositoryError> {
        let mut guard = self.accounts.lock().expect("account mutex poisoned");
        if guard.contains_key(&account.buyer_id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(account.buyer_id.clone(), account.clone());
        Ok(account)
    }

    fn fetch_account(&self, id: &BuyerId) -> Result<Option<BuyerAccount>, RepositoryError> {
        let guard = self.accounts.lock().expect("account mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn swap_account(
        &self,
        expected_revision: usize,
        account: BuyerAccount,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.accounts.lock().expect("account mutex poisoned");
        let stored = guard
            .get_mut(&account.buyer_id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.revision() != expected_revision {
            return Err(RepositoryError::Stale);
        }
        *stored = account;
        Ok(())
    }

    fn insert_offer(&self, offer: Offer) -> Result<Offer, RepositoryError> {
        let mut guard = self.offers.lock().expect("offer mutex poisoned");
        if guard.contains_key(&offer.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(offer.id.clone(), offer.clone());
        Ok(offer)
    }

    fn fetch_offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        let guard = self.offers.lock().expect("offer mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn swap_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        let mut guard = self.offers.lock().expect("offer mutex poisoned");
        let stored = guard.get_mut(&offer.id).ok_or(RepositoryError::NotFound)?;
        if stored.status() != expected {
            return Err(RepositoryError::Stale);
        }
        *stored = offer;
        Ok(())
    }

    fn retire_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        let mut offers = self.offers.lock().expect("offer mutex poisoned");
        let payments = self.payments.lock().expect("payment mutex poisoned");
        let stored = offers.get_mut(&offer.id).ok_or(RepositoryError::NotFound)?;
        let bound = payments
            .values()
            .any(|payment| payment.offer_id == offer.id && payment.status().binds_offer());
        if stored.status() != expected || bound {
            return Err(RepositoryError::Stale);
        }
        *stored = offer;
        Ok(())
    }

    fn offers_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Offer>, RepositoryError> {
        let guard = self.offers.lock().expect("offer mutex poisoned");
        Ok(guard
            .values()
            .filter(|offer| &offer.buyer_id == buyer_id)
            .cloned()
            .collect())
    }

    fn pending_offers(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        let guard = self.offers.lock().expect("offer mutex poisoned");
        Ok(guard
            .values()
            .filter(|offer| offer.status() == OfferStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn offers_with_pending_effects(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        let guard = self.offers.lock().expect("offer mutex poisoned");
        Ok(guard
            .values()
            .filter(|offer| !offer.pending_effects().is_empty())
            .take(limit)
            .cloned()
            .collect())
    }

    fn insert_payment(
        &self,
        offer_status: OfferStatus,
        payment: Payment,
    ) -> Result<Payment, RepositoryError> {
        let offers = self.offers.lock().expect("offer mutex poisoned");
        let mut guard = self.payments.lock().expect("payment mutex poisoned");
        let offer = offers
            .get(&payment.offer_id)
            .ok_or(RepositoryError::NotFound)?;
        if offer.status() != offer_status {
            return Err(RepositoryError::Stale);
        }
        if guard.contains_key(&payment.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        let guard = self.payments.lock().expect("payment mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn swap_payment(
        &self,
        expected: PaymentStatus,
        offer_status: Option<OfferStatus>,
        payment: Payment,
    ) -> Result<(), RepositoryError> {
        let offers = self.offers.lock().expect("offer mutex poisoned");
        let mut guard = self.payments.lock().expect("payment mutex poisoned");
        if let Some(required) = offer_status {
            let offer = offers
                .get(&payment.offer_id)
                .ok_or(RepositoryError::NotFound)?;
            if offer.status() != required {
                return Err(RepositoryError::Stale);
            }
        }
        let stored = guard.get_mut(&payment.id).ok_or(RepositoryError::NotFound)?;
        if stored.status() != expected {
            return Err(RepositoryError::Stale);
        }
        *stored = payment;
        Ok(())
    }

    fn payments_for_offer(&self, offer_id: &OfferId) -> Result<Vec<Payment>, RepositoryError> {
        let guard = self.payments.lock().expect("payment mutex poisoned");
        Ok(guard
            .values()
            .filter(|payment| &payment.offer_id == offer_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(super) struct MemoryAvailabilitySink {
    events: Mutex<Vec<(PropertyId, bool)>>,
}

impl MemoryAvailabilitySink {
    pub(super) fn events(&self) -> Vec<(PropertyId, bool)> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }
}

impl PropertyAvailabilitySink for MemoryAvailabilitySink {
    fn notify_availability_changed(
        &self,
        property_id: &PropertyId,
        available: bool,
    ) -> Result<(), SinkError> {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push((property_id.clone(), available));
        Ok(())
    }
}

/// Sink that fails until switched back on, counting every attempt.
#[derive(Default)]
pub(super) struct FlakySink {
    online: Mutex<bool>,
    attempts: AtomicUsize,
    delivered: MemoryAvailabilitySink,
}

impl FlakySink {
    pub(super) fn offline() -> Self {
        Self::default()
    }

    pub(super) fn reconnect(&self) {
        *self.online.lock().expect("sink mutex poisoned") = true;
    }

    pub(super) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(super) fn events(&self) -> Vec<(PropertyId, bool)> {
        self.delivered.events()
    }
}

impl PropertyAvailabilitySink for FlakySink {
    fn notify_availability_changed(
        &self,
        property_id: &PropertyId,
        available: bool,
    ) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !*self.online.lock().expect("sink mutex poisoned") {
            return Err(SinkError::Transport("listing service timed out".to_string()));
        }
        self.delivered
            .notify_availability_changed(property_id, available)
    }
}

/// Holds the first two offer reads at a barrier so both writers act on the same snapshot.
pub(super) struct RacingRepository {
    inner: MemoryRepository,
    barrier: Barrier,
    armed: AtomicUsize,
}

impl RacingRepository {
    pub(super) fn new() -> Self {
        Self {
            inner: MemoryRepository::default(),
            barrier: Barrier::new(2),
            armed: AtomicUsize::new(0),
        }
    }

    /// Arms the barrier for the next two `fetch_offer` calls.
    pub(super) fn arm(&self) {
        self.armed.store(2, Ordering::SeqCst);
    }
}

impl PurchaseRepository for RacingRepository {
    fn insert_account(&self, account: BuyerAccount) -> Result<BuyerAccount, RepositoryError> {
        self.inner.insert_account(account)
    }

    fn fetch_account(&self, id: &BuyerId) -> Result<Option<BuyerAccount>, RepositoryError> {
        self.inner.fetch_account(id)
    }

    fn swap_account(
        &self,
        expected_revision: usize,
        account: BuyerAccount,
    ) -> Result<(), RepositoryError> {
        self.inner.swap_account(expected_revision, account)
    }

    fn insert_offer(&self, offer: Offer) -> Result<Offer, RepositoryError> {
        self.inner.insert_offer(offer)
    }

    fn fetch_offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        let snapshot = self.inner.fetch_offer(id)?;
        let armed = self
            .armed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if armed {
            self.barrier.wait();
        }
        Ok(snapshot)
    }

    fn swap_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        self.inner.swap_offer(expected, offer)
    }

    fn retire_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        self.inner.retire_offer(expected, offer)
    }

    fn offers_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Offer>, RepositoryError> {
        self.inner.offers_for_buyer(buyer_id)
    }

    fn pending_offers(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        self.inner.pending_offers(limit)
    }

    fn offers_with_pending_effects(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        self.inner.offers_with_pending_effects(limit)
    }

    fn insert_payment(
        &self,
        offer_status: OfferStatus,
        payment: Payment,
    ) -> Result<Payment, RepositoryError> {
        self.inner.insert_payment(offer_status, payment)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        self.inner.fetch_payment(id)
    }

    fn swap_payment(
        &self,
        expected: PaymentStatus,
        offer_status: Option<OfferStatus>,
        payment: Payment,
    ) -> Result<(), RepositoryError> {
        self.inner.swap_payment(expected, offer_status, payment)
    }

    fn payments_for_offer(&self, offer_id: &OfferId) -> Result<Vec<Payment>, RepositoryError> {
        self.inner.payments_for_offer(offer_id)
    }
}

/// Lands a staged offer write just before the next payment insert, as a concurrent
/// request would between the service's read and its write.
#[derive(Default)]
pub(super) struct InterleavingRepository {
    inner: MemoryRepository,
    staged: Mutex<Option<(OfferStatus, Offer)>>,
}

impl InterleavingRepository {
    pub(super) fn stage_offer_write(&self, expected: OfferStatus, offer: Offer) {
        *self.staged.lock().expect("stage mutex poisoned") = Some((expected, offer));
    }
}

impl PurchaseRepository for InterleavingRepository {
    fn insert_account(&self, account: BuyerAccount) -> Result<BuyerAccount, RepositoryError> {
        self.inner.insert_account(account)
    }

    fn fetch_account(&self, id: &BuyerId) -> Result<Option<BuyerAccount>, RepositoryError> {
        self.inner.fetch_account(id)
    }

    fn swap_account(
        &self,
        expected_revision: usize,
        account: BuyerAccount,
    ) -> Result<(), RepositoryError> {
        self.inner.swap_account(expected_revision, account)
    }

    fn insert_offer(&self, offer: Offer) -> Result<Offer, RepositoryError> {
        self.inner.insert_offer(offer)
    }

    fn fetch_offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        self.inner.fetch_offer(id)
    }

    fn swap_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        self.inner.swap_offer(expected, offer)
    }

    fn retire_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        self.inner.retire_offer(expected, offer)
    }

    fn offers_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Offer>, RepositoryError> {
        self.inner.offers_for_buyer(buyer_id)
    }

    fn pending_offers(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        self.inner.pending_offers(limit)
    }

    fn offers_with_pending_effects(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        self.inner.offers_with_pending_effects(limit)
    }

    fn insert_payment(
        &self,
        offer_status: OfferStatus,
        payment: Payment,
    ) -> Result<Payment, RepositoryError> {
        let staged = self.staged.lock().expect("stage mutex poisoned").take();
        if let Some((expected, offer)) = staged {
            self.inner.retire_offer(expected, offer)?;
        }
        self.inner.insert_payment(offer_status, payment)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        self.inner.fetch_payment(id)
    }

    fn swap_payment(
        &self,
        expected: PaymentStatus,
        offer_status: Option<OfferStatus>,
        payment: Payment,
    ) -> Result<(), RepositoryError> {
        self.inner.swap_payment(expected, offer_status, payment)
    }

    fn payments_for_offer(&self, offer_id: &OfferId) -> Result<Vec<Payment>, RepositoryError> {
        self.inner.payments_for_offer(offer_id)
    }
}

pub(super) struct UnavailableRepository;

impl PurchaseRepository for UnavailableRepository {
    fn insert_account(&self, _account: BuyerAccount) -> Result<BuyerAccount, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_account(&self, _id: &BuyerId) -> Result<Option<BuyerAccount>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn swap_account(
        &self,
        _expected_revision: usize,
        _account: BuyerAccount,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn insert_offer(&self, _offer: Offer) -> Result<Offer, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_offer(&self, _id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn swap_offer(&self, _expected: OfferStatus, _offer: Offer) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn retire_offer(&self, _expected: OfferStatus, _offer: Offer) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn offers_for_buyer(&self, _buyer_id: &BuyerId) -> Result<Vec<Offer>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn pending_offers(&self, _limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn offers_with_pending_effects(&self, _limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn insert_payment(
        &self,
        _offer_status: OfferStatus,
        _payment: Payment,
    ) -> Result<Payment, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_payment(&self, _id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn swap_payment(
        &self,
        _expected: PaymentStatus,
        _offer_status: Option<OfferStatus>,
        _payment: Payment,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn payments_for_offer(&self, _offer_id: &OfferId) -> Result<Vec<Payment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 16 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
