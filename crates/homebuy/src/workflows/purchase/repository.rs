use super::domain::{BuyerId, OfferId, PaymentId, PropertyId};
use super::offers::{Offer, OfferStatus};
use super::payments::{Payment, PaymentStatus};
use super::verification::BuyerAccount;

/// Storage abstraction so the service module can be exercised in isolation.
///
/// The `swap_*` methods are compare-and-swap writes: they must fail with
/// [`RepositoryError::Stale`] when the stored entity no longer matches the expected
/// revision or status, instead of overwriting it. Writes that name an offer status for a
/// payment check that status in the same atomic step as the payment write.
pub trait PurchaseRepository: Send + Sync {
    fn insert_account(&self, account: BuyerAccount) -> Result<BuyerAccount, RepositoryError>;
    fn fetch_account(&self, id: &BuyerId) -> Result<Option<BuyerAccount>, RepositoryError>;
    fn swap_account(
        &self,
        expected_revision: usize,
        account: BuyerAccount,
    ) -> Result<(), RepositoryError>;

    fn insert_offer(&self, offer: Offer) -> Result<Offer, RepositoryError>;
    fn fetch_offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError>;
    fn swap_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError>;
    /// Like `swap_offer`, but also stale while any payment against the offer is pending
    /// or completed.
    fn retire_offer(&self, expected: OfferStatus, offer: Offer) -> Result<(), RepositoryError>;
    fn offers_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Offer>, RepositoryError>;
    fn pending_offers(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError>;
    fn offers_with_pending_effects(&self, limit: usize) -> Result<Vec<Offer>, RepositoryError>;

    /// Stale unless the payment's offer currently has status `offer_status`.
    fn insert_payment(
        &self,
        offer_status: OfferStatus,
        payment: Payment,
    ) -> Result<Payment, RepositoryError>;
    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError>;
    fn swap_payment(
        &self,
        expected: PaymentStatus,
        offer_status: Option<OfferStatus>,
        payment: Payment,
    ) -> Result<(), RepositoryError>;
    fn payments_for_offer(&self, offer_id: &OfferId) -> Result<Vec<Payment>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed since it was read")]
    Stale,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook to the property listing collaborator. Calls must be idempotent since
/// undelivered notifications are retried.
pub trait PropertyAvailabilitySink: Send + Sync {
    fn notify_availability_changed(
        &self,
        property_id: &PropertyId,
        available: bool,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("property service unavailable: {0}")]
    Transport(String),
    #[error("property {0} is unknown to the listing service")]
    UnknownProperty(PropertyId),
}
