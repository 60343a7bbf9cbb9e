//! Buyer verification levels and the offer and payment lifecycle of a property purchase.
//!
//! The rule modules (`verification`, `tier`, `offers`, `payments`, `portfolio`) are pure:
//! they take a snapshot plus an action and return the next snapshot or an
//! [`EngineError`]. [`PurchaseService`] adds storage, compare-and-swap writes, and
//! delivery of availability notifications to the property collaborator.

pub mod domain;
pub mod error;
pub mod offers;
pub mod payments;
pub mod portfolio;
pub mod repository;
pub mod router;
pub mod service;
pub mod tier;
pub mod verification;

#[cfg(test)]
mod tests;

pub use domain::{
    Actor, ActorKind, BuyerId, BuyerType, EntityKind, Money, OfferId, OfferPaymentMethod,
    PaymentChannel, PaymentId, PropertyId, ReviewerId, Role,
};
pub use error::EngineError;
pub use offers::{
    Offer, OfferAction, OfferStatus, OfferSubmission, OfferTransition, PendingEffect,
    PropertyAvailabilityChanged,
};
pub use payments::{
    Payment, PaymentLedger, PaymentRequest, PaymentStatus, MAX_PAYMENT_MULTIPLE,
};
pub use portfolio::{aggregate, portfolio, PortfolioClassification, PortfolioEntry};
pub use repository::{PropertyAvailabilitySink, PurchaseRepository, RepositoryError, SinkError};
pub use router::purchase_router;
pub use service::{AccountStanding, EffectRetryReport, PurchaseService, PurchaseServiceError};
pub use tier::{derive_level, derive_permissions, KycLevel, Permission, PermissionSet};
pub use verification::{
    AccountEvent, BuyerAccount, IntegrityViolation, VerificationEvent, VerificationKind,
    VerificationLedger,
};
