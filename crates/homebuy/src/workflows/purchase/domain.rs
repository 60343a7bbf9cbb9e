use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Monetary amounts are exact decimals in the marketplace currency.
pub type Money = Decimal;

/// Identifier wrapper for marketplace accounts acting as buyers (and possibly sellers).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuyerId(pub String);

/// Identifier wrapper for listed properties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub String);

/// Identifier wrapper for purchase offers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfferId(pub String);

/// Identifier wrapper for payment records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

/// Identifier of an authenticated back-office reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewerId(pub String);

macro_rules! display_id {
    ($($name:ident),+) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

display_id!(BuyerId, PropertyId, OfferId, PaymentId, ReviewerId);

/// Who is asking for a transition. Authentication happens upstream; the engine only
/// checks that the kind of actor is allowed to perform the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Buyer(BuyerId),
    Reviewer(ReviewerId),
    System,
}

impl Actor {
    pub const fn kind(&self) -> ActorKind {
        match self {
            Actor::Buyer(_) => ActorKind::Buyer,
            Actor::Reviewer(_) => ActorKind::Reviewer,
            Actor::System => ActorKind::System,
        }
    }

    /// True when the actor is the given buyer.
    pub fn is_buyer(&self, buyer_id: &BuyerId) -> bool {
        matches!(self, Actor::Buyer(id) if id == buyer_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Buyer,
    Reviewer,
    System,
}

impl ActorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ActorKind::Buyer => "buyer",
            ActorKind::Reviewer => "reviewer",
            ActorKind::System => "system",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the buyer intends to finance purchases, chosen during the financial assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerType {
    Cash,
    Installment,
    #[default]
    None,
}

/// Marketplace roles an account may hold at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

/// Settlement method proposed on an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferPaymentMethod {
    Cash,
    Installments,
}

/// Channel used for an individual payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    BankTransfer,
    Card,
    Cheque,
    Cash,
}

/// Entities whose status is guarded by a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Offer,
    Payment,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Offer => "offer",
            EntityKind::Payment => "payment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
