use homebuy::workflows::purchase::{
    BuyerAccount, BuyerId, Offer, OfferId, OfferStatus, Payment, PaymentId, PaymentStatus,
    PropertyAvailabilitySink, PropertyId, PurchaseRepository, RepositoryError, SinkError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("in-memory store lock poisoned".to_string()))
}

/// Process-local store backing the demo and the default server wiring. Writes that span
/// offers and payments take the offer lock first.
#[derive(Default, Clone)]
pub(crate) struct InMemoryPurchaseRepository {
    accounts: Arc<Mutex<HashMap<BuyerId, BuyerAccount>>>,
    offers: Arc<Mutex<HashMap<OfferId, Offer>>>,
    payments: Arc<Mutex<HashMap<PaymentId, Payment>>>,
}

impl PurchaseRepository for InMemoryPurchaseRepository {
    fn insert_account(&self, account: BuyerAccount) -> Result<BuyerAccount, RepositoryError> {
        let mut guard = lock(&self.accounts)?;
        if guard.contains_key(&account.buyer_id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(account.buyer_id.clone(), account.clone());
        Ok(account)
    }

    fn fetch_account(&self, id: &BuyerId) -> Result<Option<BuyerAccount>, RepositoryError> {
        Ok(lock(&self.accounts)?.get(id).cloned())
    }

    fn swap_account(
        &self,
        expected_revision: usize,
        account: BuyerAccount,
    ) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.accounts)?;
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
        let mut guard = lock(&self.offers)?;
        if guard.contains_key(&offer.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(offer.id.clone(), offer.clone());
        Ok(offer)
    }

    fn fetch_offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        Ok(lock(&self.offers)?.get(id).cloned())
    }

    fn swap_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.offers)?;
        let stored = guard.get_mut(&offer.id).ok_or(RepositoryError::NotFound)?;
        if stored.status() != expected {
            return Err(RepositoryError::Stale);
        }
        *stored = offer;
        Ok(())
    }

    fn retire_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError> {
        let mut offers = lock(&self.offers)?;
        let payments = lock(&self.payments)?;
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
        let mut offers: Vec<Offer> = lock(&self.offers)?
            .values()
            .filter(|offer| &offer.buyer_id == buyer_id)
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(offers)
    }

    fn pending_offers(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        let mut offers: Vec<Offer> = lock(&self.offers)?
            .values()
            .filter(|offer| offer.status() == OfferStatus::Pending)
            .cloned()
            .collect();
        offers.sort_by_key(|offer| offer.expires_at);
        offers.truncate(limit);
        Ok(offers)
    }

    fn offers_with_pending_effects(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError> {
        Ok(lock(&self.offers)?
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
        let offers = lock(&self.offers)?;
        let mut guard = lock(&self.payments)?;
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
        Ok(lock(&self.payments)?.get(id).cloned())
    }

    fn swap_payment(
        &self,
        expected: PaymentStatus,
        offer_status: Option<OfferStatus>,
        payment: Payment,
    ) -> Result<(), RepositoryError> {
        let offers = lock(&self.offers)?;
        let mut guard = lock(&self.payments)?;
        if let Some(required) = offer_status {
            let current = offers.get(&payment.offer_id).map(Offer::status);
            if current != Some(required) {
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
        let mut payments: Vec<Payment> = lock(&self.payments)?
            .values()
            .filter(|payment| &payment.offer_id == offer_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }
}

/// Availability sink that records changes locally instead of calling the listing service.
#[derive(Default, Clone)]
pub(crate) struct InMemoryAvailabilitySink {
    changes: Arc<Mutex<Vec<(PropertyId, bool)>>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryAvailabilitySink {
    pub(crate) fn changes(&self) -> Vec<(PropertyId, bool)> {
        self.changes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Simulates an outage of the listing service.
    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, Ordering::Release);
    }
}

impl PropertyAvailabilitySink for InMemoryAvailabilitySink {
    fn notify_availability_changed(
        &self,
        property_id: &PropertyId,
        available: bool,
    ) -> Result<(), SinkError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(SinkError::Transport(
                "listing service unreachable".to_string(),
            ));
        }
        let mut guard = self
            .changes
            .lock()
            .map_err(|_| SinkError::Transport("sink lock poisoned".to_string()))?;
        guard.push((property_id.clone(), available));
        info!(%property_id, available, "property availability updated");
        Ok(())
    }
}
