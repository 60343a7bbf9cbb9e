use super::domain::{ActorKind, EntityKind, Money, OfferId};
use super::offers::OfferStatus;
use super::tier::Permission;
use super::verification::{IntegrityViolation, VerificationKind};

/// Failures raised by the verification, offer, payment, and portfolio rules.
///
/// Every variant is recoverable at the caller. `LedgerIntegrity` is the exception in
/// spirit: it signals corrupted data and is logged as an alarm before being returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} verification requires {missing} verification first")]
    PrerequisiteNotMet {
        kind: VerificationKind,
        missing: VerificationKind,
    },
    #[error("illegal {entity} transition from {from} to {to}")]
    IllegalTransition {
        entity: EntityKind,
        from: &'static str,
        to: &'static str,
    },
    #[error("offer {offer_id} is {status} and cannot accept payments")]
    OfferNotApproved {
        offer_id: OfferId,
        status: OfferStatus,
    },
    #[error("{entity} {id} was modified concurrently; reload and retry")]
    ConcurrentModification { entity: EntityKind, id: String },
    #[error("property availability update for offer {offer_id} failed: {reason}")]
    SideEffectFailed { offer_id: OfferId, reason: String },
    #[error("verification ledger failed integrity check: {0}")]
    LedgerIntegrity(IntegrityViolation),
    #[error("{actor} is not allowed to {action}")]
    Unauthorized {
        actor: ActorKind,
        action: &'static str,
    },
    #[error("account lacks the {0} permission")]
    PermissionDenied(Permission),
    #[error("a rejection reason is required")]
    MissingRejectionReason,
    #[error("invalid {field}: {amount}")]
    InvalidAmount { field: &'static str, amount: Money },
    #[error("offer {0} has not reached its expiry time")]
    NotYetExpired(OfferId),
}
